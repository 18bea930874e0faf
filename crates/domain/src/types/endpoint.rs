//! Request descriptors for the chat backend.

use serde::{Deserialize, Serialize};

use super::ids::{ChannelId, MessageId};

/// HTTP method of a request descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

/// The remote endpoints this layer issues or replays.
///
/// The path doubles as the declared response kind of a request: it decides
/// whether a call may be queued offline and which store reconciliation runs
/// after a successful replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum EndpointPath {
    SendMessage { channel_id: ChannelId, message_id: MessageId },
    EditMessage { message_id: MessageId },
    DeleteMessage { message_id: MessageId },
    AddReaction { message_id: MessageId },
    RemoveReaction { message_id: MessageId },
    MissingEvents,
    WatchChannel { channel_id: ChannelId },
    Channels,
    Guest,
    CreateChannel { channel_id: ChannelId },
}

impl EndpointPath {
    /// Allow-list of mutations that survive offline and are replayed after
    /// reconnect. Everything else is never queued.
    #[must_use]
    pub fn should_be_queued_offline(&self) -> bool {
        matches!(
            self,
            Self::SendMessage { .. }
                | Self::EditMessage { .. }
                | Self::DeleteMessage { .. }
                | Self::AddReaction { .. }
                | Self::RemoveReaction { .. }
        )
    }

    /// Short name used as a structured-log field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::MissingEvents => "missing_events",
            Self::WatchChannel { .. } => "watch_channel",
            Self::Channels => "channels",
            Self::Guest => "guest",
            Self::CreateChannel { .. } => "create_channel",
        }
    }
}

/// A request descriptor: what to call, how, and with which body.
///
/// Credential headers are never part of a descriptor; the network client
/// attaches them at send time, so a replayed request always goes out with
/// the current token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: EndpointPath,
    pub method: HttpMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Endpoint {
    pub fn new(path: EndpointPath, method: HttpMethod) -> Self {
        Self { path, method, body: None }
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_and_reaction_mutations_are_queueable() {
        let queueable = [
            EndpointPath::SendMessage { channel_id: "messaging:1".into(), message_id: "m1".into() },
            EndpointPath::EditMessage { message_id: "m1".into() },
            EndpointPath::DeleteMessage { message_id: "m1".into() },
            EndpointPath::AddReaction { message_id: "m1".into() },
            EndpointPath::RemoveReaction { message_id: "m1".into() },
        ];
        for path in queueable {
            assert!(path.should_be_queued_offline(), "{} should queue", path.name());
        }
    }

    #[test]
    fn reads_and_unsupported_mutations_are_not_queueable() {
        let rejected = [
            EndpointPath::MissingEvents,
            EndpointPath::WatchChannel { channel_id: "messaging:1".into() },
            EndpointPath::Channels,
            EndpointPath::Guest,
            EndpointPath::CreateChannel { channel_id: "messaging:1".into() },
        ];
        for path in rejected {
            assert!(!path.should_be_queued_offline(), "{} should not queue", path.name());
        }
    }

    #[test]
    fn endpoint_round_trips_through_json() {
        let endpoint = Endpoint::new(
            EndpointPath::SendMessage { channel_id: "messaging:1".into(), message_id: "m1".into() },
            HttpMethod::Post,
        )
        .with_body(serde_json::json!({"text": "hi"}));

        let raw = serde_json::to_string(&endpoint).unwrap();
        let back: Endpoint = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, endpoint);
    }
}
