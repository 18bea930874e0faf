//! Reconnection pipeline bringing the local store back up to date.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use driftline_domain::{
    ChannelId, ChannelListQuery, ChannelPage, DriftlineError, Endpoint, EndpointPath, HttpMethod,
    MissingEventsPayload, Result,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ports::{ActiveSessionViews, SyncStore};
use crate::connection::ports::RecoveryFlow;
use crate::network_ports::ApiClient;
use crate::offline::OfflineRequestQueue;

/// Tuning for the sync pipeline.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retries allowed per pipeline step before it is skipped.
    pub step_retries: u32,
    /// Minimum spacing between standalone missed-event syncs.
    pub sync_cooldown: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { step_retries: 2, sync_cooldown: Duration::from_secs(6) }
    }
}

/// Which of the network client's lanes a call goes through.
#[derive(Clone, Copy)]
enum Lane {
    Ordinary,
    Recovery,
}

/// Accumulator threaded through one pipeline run.
#[derive(Default)]
struct SyncContext {
    local_channel_ids: Vec<ChannelId>,
    synced_channel_ids: HashSet<ChannelId>,
    watched_channel_ids: HashSet<ChannelId>,
}

/// Orchestrates the fixed sequence of steps that reconciles local state
/// with the server after a (re)connection.
///
/// Steps run strictly in order. A step that keeps failing is retried a
/// bounded number of times and then skipped, so a single uncooperative
/// endpoint can never block the rest of the reconnection. Starting a new
/// run cancels whichever run is still in flight; the cancelled run stops at
/// its next step boundary.
pub struct SyncService {
    api: Arc<dyn ApiClient>,
    store: Arc<dyn SyncStore>,
    views: Arc<dyn ActiveSessionViews>,
    offline: Arc<OfflineRequestQueue>,
    config: SyncConfig,
    active_run: Mutex<CancellationToken>,
    last_connection_at: Mutex<Option<DateTime<Utc>>>,
}

impl SyncService {
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: Arc<dyn SyncStore>,
        views: Arc<dyn ActiveSessionViews>,
        offline: Arc<OfflineRequestQueue>,
        config: SyncConfig,
    ) -> Self {
        Self {
            api,
            store,
            views,
            offline,
            config,
            active_run: Mutex::new(CancellationToken::new()),
            last_connection_at: Mutex::new(None),
        }
    }

    /// Runs the full reconciliation pipeline.
    ///
    /// Ordinary traffic is parked on the network client for the duration so
    /// recovery calls are never starved by it.
    pub async fn sync_local_state(&self) -> Result<()> {
        let cancel = self.begin_run();
        self.api.enter_recovery_mode();
        let outcome = self.run_pipeline(&cancel).await;
        self.api.exit_recovery_mode();
        if let Err(error) = &outcome {
            debug!(%error, "sync run ended early");
        }
        outcome
    }

    /// Syncs missed events for stored channels using the last-received
    /// watermark. Gated by a cooldown; calls inside it complete immediately
    /// with nothing to do. Completes with the channel ids that got events.
    pub async fn sync_existing_channels_events(&self) -> Result<Vec<ChannelId>> {
        let channel_ids = self.store.channel_ids().await?;
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let since = match self.store.last_received_event_at().await? {
            Some(at) => at,
            None => {
                // First sync for this user: start the watermark now, there
                // is no window to catch up on yet.
                let now = Utc::now();
                self.store.set_last_received_event_at(now).await?;
                debug!("no event watermark yet, starting one");
                return Ok(Vec::new());
            }
        };
        let elapsed = (Utc::now() - since).to_std().unwrap_or(Duration::ZERO);
        if elapsed < self.config.sync_cooldown {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "event sync still cooling down");
            return Ok(Vec::new());
        }
        self.sync_missing_events(since, &channel_ids, Lane::Ordinary).await
    }

    /// Remembers the instant connectivity was lost so the next sync knows
    /// where to resume. An existing marker is kept; it points at the oldest
    /// incomplete sync.
    pub async fn record_pending_connection(&self, at: DateTime<Utc>) -> Result<()> {
        if self.store.pending_connection_at().await?.is_some() {
            debug!("pending connection marker already set, keeping the older one");
            return Ok(());
        }
        self.store.set_pending_connection_at(Some(at)).await
    }

    /// Remembers the most recent instant a connection was established.
    pub fn record_last_connection(&self, at: DateTime<Utc>) {
        *self.last_connection_at.lock() = Some(at);
    }

    /// Instant of the most recent successful connection, if any.
    #[must_use]
    pub fn last_connection_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connection_at.lock()
    }

    fn begin_run(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.active_run.lock(), fresh.clone());
        previous.cancel();
        fresh
    }

    async fn run_pipeline(&self, cancel: &CancellationToken) -> Result<()> {
        let mut context = SyncContext {
            local_channel_ids: self.collect_channel_ids().await,
            ..SyncContext::default()
        };
        info!(channels = context.local_channel_ids.len(), "starting local state sync");

        match self.store.pending_connection_at().await {
            Ok(Some(since)) => {
                let synced = self
                    .retrying(cancel, "missed-events", || {
                        self.sync_missing_events(since, &context.local_channel_ids, Lane::Recovery)
                    })
                    .await?;
                if let Some(synced) = synced {
                    context.synced_channel_ids.extend(synced);
                }
            }
            Ok(None) => debug!("no pending connection marker, nothing to catch up on"),
            Err(error) => warn!(%error, "could not read the pending connection marker"),
        }

        for channel_id in self.views.watched_channel_ids() {
            if context.synced_channel_ids.contains(&channel_id) {
                continue;
            }
            if self
                .retrying(cancel, "watch-channel", || self.watch_channel(&channel_id))
                .await?
                .is_some()
            {
                context.watched_channel_ids.insert(channel_id);
            }
        }

        for query in self.views.list_queries() {
            if let Some(page) = self
                .retrying(cancel, "refresh-channel-list", || self.refresh_list_query(&query))
                .await?
            {
                context.synced_channel_ids.extend(page.channel_ids);
            }
        }

        self.retrying(cancel, "offline-replay", || self.offline.run_queued_requests()).await?;

        if cancel.is_cancelled() {
            return Err(DriftlineError::Cancelled);
        }
        let now = Utc::now();
        if let Err(error) = self.store.set_last_sync_at(now).await {
            warn!(%error, "could not bump the last sync instant");
        }
        if let Err(error) = self.store.set_pending_connection_at(None).await {
            warn!(%error, "could not clear the pending connection marker");
        }
        info!(
            synced = context.synced_channel_ids.len(),
            watched = context.watched_channel_ids.len(),
            "local state sync finished"
        );
        Ok(())
    }

    /// Runs one pipeline step, retrying retryable failures up to the
    /// configured bound. `Ok(None)` means the step was skipped; `Err` only
    /// ever carries a cancellation.
    async fn retrying<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        step: &'static str,
        mut call: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(step, "sync run cancelled");
                return Err(DriftlineError::Cancelled);
            }
            match call().await {
                Ok(value) => return Ok(Some(value)),
                Err(error) if error.should_retry() && attempt < self.config.step_retries => {
                    attempt += 1;
                    debug!(step, attempt, %error, "retrying sync step");
                }
                Err(error) => {
                    warn!(step, %error, "skipping sync step");
                    return Ok(None);
                }
            }
        }
    }

    async fn collect_channel_ids(&self) -> Vec<ChannelId> {
        let mut ids = match self.store.channel_ids().await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(%error, "could not enumerate stored channels");
                Vec::new()
            }
        };
        for id in self.views.channel_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    async fn sync_missing_events(
        &self,
        since: DateTime<Utc>,
        channel_ids: &[ChannelId],
        lane: Lane,
    ) -> Result<Vec<ChannelId>> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = Endpoint::new(EndpointPath::MissingEvents, HttpMethod::Post)
            .with_body(json!({ "last_sync_at": since, "channel_cids": channel_ids }));
        let response = match lane {
            Lane::Ordinary => self.api.request(&endpoint).await,
            Lane::Recovery => self.api.recovery_request(&endpoint).await,
        };
        let payload: MissingEventsPayload = match response {
            Ok(value) => serde_json::from_value(value)
                .map_err(|error| DriftlineError::Decode(error.to_string()))?,
            Err(DriftlineError::Api(payload)) if payload.is_too_many_events() => {
                // The window is too wide to enumerate. Accepted as a clean
                // outcome; the list refetch further down restores state.
                info!(since = %since, "too many missed events, relying on refetch");
                return Ok(Vec::new());
            }
            Err(error) => return Err(error),
        };
        if !payload.events.is_empty() {
            self.store.apply_events(&payload).await?;
        }
        if let Some(newest) = payload.newest_event_at() {
            self.store.set_last_received_event_at(newest).await?;
        }
        let covered: Vec<ChannelId> = payload.channel_ids().into_iter().collect();
        debug!(events = payload.events.len(), channels = covered.len(), "applied missed events");
        Ok(covered)
    }

    async fn watch_channel(&self, channel_id: &ChannelId) -> Result<()> {
        let endpoint = Endpoint::new(
            EndpointPath::WatchChannel { channel_id: channel_id.clone() },
            HttpMethod::Post,
        )
        .with_body(json!({ "watch": true }));
        self.api.recovery_request(&endpoint).await?;
        Ok(())
    }

    async fn refresh_list_query(&self, query: &ChannelListQuery) -> Result<ChannelPage> {
        let endpoint = Endpoint::new(EndpointPath::Channels, HttpMethod::Post).with_body(json!({
            "filter_hash": query.filter_hash,
            "limit": query.page_size,
            "watch": true,
        }));
        let response = self.api.recovery_request(&endpoint).await?;
        let page: ChannelPage = serde_json::from_value(response)
            .map_err(|error| DriftlineError::Decode(error.to_string()))?;
        self.store.replace_query_results(query, &page).await?;
        Ok(page)
    }
}

impl RecoveryFlow for SyncService {
    fn cancel_active_run(&self) {
        debug!("cancelling active sync run");
        self.active_run.lock().cancel();
    }
}
