//! Replayable queue for mutations issued while offline.

use std::sync::Arc;
use std::time::Duration;

use driftline_domain::{Endpoint, EndpointPath, QueuedRequest, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ports::{MessageReconciler, RequestStore, StoredRequest};
use crate::network_ports::ApiClient;

/// Tuning for the offline write queue.
#[derive(Debug, Clone)]
pub struct OfflineQueueConfig {
    /// Records older than this are evicted instead of replayed.
    pub max_request_age: Duration,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self { max_request_age: Duration::from_secs(12 * 60 * 60) }
    }
}

/// Durably records mutating calls made while offline and replays them, in
/// enqueue order, once the backend is reachable again.
pub struct OfflineRequestQueue {
    api: Arc<dyn ApiClient>,
    store: Arc<dyn RequestStore>,
    reconciler: Arc<dyn MessageReconciler>,
    config: OfflineQueueConfig,
}

impl OfflineRequestQueue {
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: Arc<dyn RequestStore>,
        reconciler: Arc<dyn MessageReconciler>,
        config: OfflineQueueConfig,
    ) -> Self {
        Self { api, store, reconciler, config }
    }

    /// Persists a mutating request for later replay.
    ///
    /// Requests outside the offline allow-list are dropped; callers treat
    /// queueing as fire-and-forget either way.
    pub async fn queue_offline_request(&self, endpoint: Endpoint) -> Result<()> {
        if !endpoint.path.should_be_queued_offline() {
            debug!(path = endpoint.path.name(), "request cannot be queued offline, dropping");
            return Ok(());
        }
        let request = QueuedRequest::new(endpoint);
        debug!(id = %request.id, path = request.endpoint.path.name(), "queueing request");
        self.store.enqueue(&request).await
    }

    /// Replays every queued request strictly in enqueue order.
    ///
    /// Completes only once each record has been resolved: replayed and
    /// deleted, kept for the next run, or evicted.
    pub async fn run_queued_requests(&self) -> Result<()> {
        let records = self.store.all_queued().await?;
        if records.is_empty() {
            debug!("no queued requests to replay");
            return Ok(());
        }
        info!(count = records.len(), "replaying queued requests");
        for record in records {
            self.replay_record(record).await?;
        }
        Ok(())
    }

    async fn replay_record(&self, record: StoredRequest) -> Result<()> {
        let endpoint = match serde_json::from_value::<Endpoint>(record.endpoint) {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!(id = %record.id, %error, "evicting queued request that no longer decodes");
                return self.store.delete(record.id).await;
            }
        };
        let request = QueuedRequest { id: record.id, endpoint, enqueued_at: record.enqueued_at };
        if request.is_older_than(self.config.max_request_age) {
            info!(
                id = %request.id,
                path = request.endpoint.path.name(),
                "evicting queued request past the replay window"
            );
            return self.store.delete(request.id).await;
        }
        if !request.endpoint.path.should_be_queued_offline() {
            info!(
                id = %request.id,
                path = request.endpoint.path.name(),
                "evicting queued request whose path is no longer replayable"
            );
            return self.store.delete(request.id).await;
        }

        match self.api.recovery_request(&request.endpoint).await {
            Ok(response) => {
                debug!(id = %request.id, path = request.endpoint.path.name(), "replayed");
                self.store.delete(request.id).await?;
                self.reconcile(&request.endpoint.path, &response).await;
                Ok(())
            }
            Err(error) if error.is_connection_failure() => {
                debug!(id = %request.id, %error, "still unreachable, keeping queued request");
                Ok(())
            }
            Err(error) => {
                warn!(
                    id = %request.id,
                    path = request.endpoint.path.name(),
                    %error,
                    "backend rejected replay, evicting queued request"
                );
                self.store.delete(request.id).await
            }
        }
    }

    async fn reconcile(&self, path: &EndpointPath, response: &Value) {
        let outcome = match path {
            EndpointPath::SendMessage { channel_id, .. } => {
                self.reconciler.save_successfully_sent_message(channel_id, response).await
            }
            EndpointPath::EditMessage { message_id } => {
                self.reconciler.save_successfully_edited_message(message_id).await
            }
            EndpointPath::DeleteMessage { message_id } => {
                self.reconciler.save_successfully_deleted_message(message_id).await
            }
            _ => Ok(()),
        };
        if let Err(error) = outcome {
            warn!(path = path.name(), %error, "post-replay reconciliation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use driftline_domain::HttpMethod;

    use super::*;
    use crate::testing::{InMemoryRequestStore, MockApiClient, RecordingReconciler};

    fn queue_with_store() -> (OfflineRequestQueue, Arc<InMemoryRequestStore>) {
        let store = Arc::new(InMemoryRequestStore::default());
        let queue = OfflineRequestQueue::new(
            Arc::new(MockApiClient::default()),
            Arc::clone(&store) as Arc<dyn RequestStore>,
            Arc::new(RecordingReconciler::default()),
            OfflineQueueConfig::default(),
        );
        (queue, store)
    }

    #[tokio::test]
    async fn reads_are_never_queued() {
        let (queue, store) = queue_with_store();

        let endpoint = Endpoint::new(EndpointPath::Channels, HttpMethod::Post);
        queue.queue_offline_request(endpoint).await.unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn queueable_mutations_are_persisted() {
        let (queue, store) = queue_with_store();

        let endpoint = Endpoint::new(
            EndpointPath::SendMessage { channel_id: "messaging:1".into(), message_id: "m1".into() },
            HttpMethod::Post,
        );
        queue.queue_offline_request(endpoint).await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
