//! Durable offline request records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::Endpoint;

/// Durable record of a mutating call issued while offline.
///
/// Owned exclusively by the offline write queue. Deleted once successfully
/// replayed, permanently rejected, or older than the configured maximum age.
/// Replay order is the store's enqueue order, not the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedRequest {
    /// Wraps an endpoint descriptor for durable storage.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self { id: Uuid::now_v7(), endpoint, enqueued_at: Utc::now() }
    }

    /// Whether the record has outlived the replay window.
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.enqueued_at);
        chrono::Duration::from_std(max_age).is_ok_and(|max| age > max)
    }
}

#[cfg(test)]
mod tests {
    use super::super::endpoint::{EndpointPath, HttpMethod};
    use super::*;

    fn request() -> QueuedRequest {
        QueuedRequest::new(Endpoint::new(
            EndpointPath::EditMessage { message_id: "m1".into() },
            HttpMethod::Patch,
        ))
    }

    #[test]
    fn fresh_requests_are_inside_the_replay_window() {
        assert!(!request().is_older_than(Duration::from_secs(60)));
    }

    #[test]
    fn backdated_requests_are_evicted() {
        let mut stale = request();
        stale.enqueued_at = Utc::now() - chrono::Duration::hours(13);
        assert!(stale.is_older_than(Duration::from_secs(12 * 60 * 60)));
    }
}
