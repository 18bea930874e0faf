//! Port interfaces for the offline write queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftline_domain::{ChannelId, MessageId, QueuedRequest, Result};
use serde_json::Value;
use uuid::Uuid;

/// A queued request the way the store hands it back.
///
/// The endpoint stays an opaque JSON value until replay time; it is decoded
/// per record so one corrupt row cannot poison the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRequest {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub endpoint: Value,
}

impl From<&QueuedRequest> for StoredRequest {
    fn from(request: &QueuedRequest) -> Self {
        Self {
            id: request.id,
            enqueued_at: request.enqueued_at,
            endpoint: serde_json::to_value(&request.endpoint).unwrap_or(Value::Null),
        }
    }
}

/// Durable queue of offline mutations.
///
/// `all_queued` must return records in enqueue order; replay relies on the
/// store for ordering.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn enqueue(&self, request: &QueuedRequest) -> Result<()>;

    async fn all_queued(&self) -> Result<Vec<StoredRequest>>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Store reconciliation after a replayed mutation is accepted by the server.
///
/// Reaction mutations need no reconciliation; the live event stream covers
/// them.
#[async_trait]
pub trait MessageReconciler: Send + Sync {
    /// A message composed offline went through; persist the server's copy.
    async fn save_successfully_sent_message(
        &self,
        channel_id: &ChannelId,
        payload: &Value,
    ) -> Result<()>;

    /// An edit went through; the local copy is current again.
    async fn save_successfully_edited_message(&self, message_id: &MessageId) -> Result<()>;

    /// A delete went through; mark the local copy permanently deleted.
    async fn save_successfully_deleted_message(&self, message_id: &MessageId) -> Result<()>;
}
