//! Missed-event payloads returned by the sync endpoint.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ChannelId;

/// A single event the device missed while disconnected.
///
/// The session layer only needs the envelope; the payload is applied to the
/// store untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Batch of missed events for a channel-id set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingEventsPayload {
    #[serde(default)]
    pub events: Vec<ChatEvent>,
}

impl MissingEventsPayload {
    /// Channel ids covered by the batch.
    #[must_use]
    pub fn channel_ids(&self) -> HashSet<ChannelId> {
        self.events.iter().filter_map(|event| event.channel_id.clone()).collect()
    }

    /// Creation instant of the newest event in the batch.
    #[must_use]
    pub fn newest_event_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|event| event.created_at).max()
    }
}
