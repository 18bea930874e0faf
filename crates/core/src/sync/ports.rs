//! Port interfaces for local-state synchronization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftline_domain::{ChannelId, ChannelListQuery, ChannelPage, MissingEventsPayload, Result};

/// Sync-facing slice of the persistent store.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Channel ids with local state worth keeping in sync.
    async fn channel_ids(&self) -> Result<Vec<ChannelId>>;

    /// Marker left by a connection whose sync never completed.
    async fn pending_connection_at(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_pending_connection_at(&self, at: Option<DateTime<Utc>>) -> Result<()>;

    /// Instant the last full sync finished.
    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()>;

    /// Creation instant of the newest event the device has applied.
    async fn last_received_event_at(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_received_event_at(&self, at: DateTime<Utc>) -> Result<()>;

    /// Applies a batch of missed events.
    async fn apply_events(&self, payload: &MissingEventsPayload) -> Result<()>;

    /// Replaces the first page of a channel-list query with fresh results.
    async fn replace_query_results(
        &self,
        query: &ChannelListQuery,
        page: &ChannelPage,
    ) -> Result<()>;
}

/// Snapshot of what the embedding application currently has on screen.
///
/// Queried once per sync run; the pipeline never holds on to the snapshot
/// across await points, so implementations are free to read live UI state.
pub trait ActiveSessionViews: Send + Sync {
    /// Channels an open view is displaying.
    fn channel_ids(&self) -> Vec<ChannelId>;

    /// Channels being actively watched and needing a re-watch on reconnect.
    fn watched_channel_ids(&self) -> Vec<ChannelId>;

    /// Channel-list queries with an open view.
    fn list_queries(&self) -> Vec<ChannelListQuery>;
}
