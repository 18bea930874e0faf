//! Connection identity and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorPayload;

/// Identifier assigned by the backend once a live connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Why a live connection ended or is ending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum DisconnectSource {
    /// The caller asked for the disconnect.
    UserInitiated,
    /// The SDK closed the connection itself (teardown, backgrounding).
    SystemInitiated,
    /// The backend closed the connection, possibly carrying an error body.
    ServerInitiated { error: Option<ErrorPayload> },
}

impl DisconnectSource {
    /// The backend error carried by a server-initiated disconnect, if any.
    #[must_use]
    pub fn server_error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::ServerInitiated { error } => error.as_ref(),
            _ => None,
        }
    }
}

/// Authoritative connection status of a session.
///
/// A single value per session, mutated only by the connection manager in
/// response to transport events. There is no terminal state: a disconnected
/// session can always connect again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    WaitingForConnectionId,
    Connected { connection_id: ConnectionId },
    Disconnecting { source: DisconnectSource },
    Disconnected { source: DisconnectSource },
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            Self::Connected { connection_id } => Some(connection_id),
            _ => None,
        }
    }

    /// Backend error carried by a disconnect (or in-progress disconnect).
    #[must_use]
    pub fn server_error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Disconnecting { source } | Self::Disconnected { source } => {
                source.server_error()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(code: i32) -> ErrorPayload {
        ErrorPayload { code, message: "boom".into(), status_code: 401 }
    }

    #[test]
    fn connected_state_exposes_its_id() {
        let state = ConnectionState::Connected { connection_id: "c1".into() };
        assert!(state.is_connected());
        assert_eq!(state.connection_id().map(ConnectionId::as_str), Some("c1"));
    }

    #[test]
    fn server_error_only_surfaces_for_server_initiated_disconnects() {
        let state = ConnectionState::Disconnected {
            source: DisconnectSource::ServerInitiated { error: Some(payload(40)) },
        };
        assert_eq!(state.server_error().map(|e| e.code), Some(40));

        let state =
            ConnectionState::Disconnected { source: DisconnectSource::UserInitiated };
        assert!(state.server_error().is_none());
    }
}
