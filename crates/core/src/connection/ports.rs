//! Port interfaces for the connection lifecycle.

use async_trait::async_trait;
use driftline_domain::{ConnectionState, DisconnectSource, Result, Token, UserInfo};

/// A connection state transition reported by the transport.
///
/// The session event loop forwards these to
/// `ConnectionManager::handle_transport_event`; tests inject them directly.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub state: ConnectionState,
}

impl From<ConnectionState> for TransportEvent {
    fn from(state: ConnectionState) -> Self {
        Self { state }
    }
}

/// Live connection to the backend.
///
/// Implementations own the socket; this layer only tells them when to open,
/// when to close, and which identity to connect as. State transitions come
/// back as [`TransportEvent`]s on the channel the integrator wires to the
/// session event loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection to the currently configured endpoint.
    async fn connect(&self) -> Result<()>;

    /// Closes the connection; resolves once the transport reports closed.
    async fn disconnect(&self, source: DisconnectSource) -> Result<()>;

    /// Re-points the connect target at the given credentials and identity.
    fn update_endpoint(&self, token: &Token, connect_as: &UserInfo);
}

/// Cancellation hook into whatever recovery run is active.
///
/// Implemented by the sync orchestrator and handed to the connection
/// manager after construction, since the two reference each other.
pub trait RecoveryFlow: Send + Sync {
    fn cancel_active_run(&self);
}
