//! Connection lifecycle manager.
//!
//! Owns the authoritative connection status, the cached connection id, and
//! the waiters parked on the next id. Transport state reports flow in
//! through [`ConnectionManager::handle_transport_event`]; everything else
//! reads the cache. The cached id mirrors the reported state, so it is
//! `Some` exactly while the status is `Connected`.

use std::sync::Arc;
use std::time::Duration;

use driftline_common::{WaitError, WaiterRegistry};
use driftline_domain::{
    ConnectionId, ConnectionState, DisconnectSource, DriftlineError, ErrorPayload, Result, Token,
    UserInfo,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::connection::ports::{RecoveryFlow, Transport};
use crate::network_ports::ApiClient;

/// Tuning knobs for the connection lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// How long `connect()` waits for the backend to assign an id.
    pub waiter_timeout: Duration,
    /// A passive manager never opens the transport or produces an id.
    pub active_mode: bool,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self { waiter_timeout: Duration::from_secs(10), active_mode: true }
    }
}

#[derive(Debug)]
struct TrackedState {
    connection_id: Option<ConnectionId>,
    status: ConnectionState,
}

/// Authoritative owner of the session's connection state.
pub struct ConnectionManager {
    api: Arc<dyn ApiClient>,
    transport: Arc<dyn Transport>,
    config: ConnectionManagerConfig,
    state: RwLock<TrackedState>,
    waiters: WaiterRegistry<Option<ConnectionId>>,
    recovery: RwLock<Option<Arc<dyn RecoveryFlow>>>,
}

impl ConnectionManager {
    pub fn new(
        api: Arc<dyn ApiClient>,
        transport: Arc<dyn Transport>,
        config: ConnectionManagerConfig,
    ) -> Self {
        Self {
            api,
            transport,
            config,
            state: RwLock::new(TrackedState {
                connection_id: None,
                status: ConnectionState::Uninitialized,
            }),
            waiters: WaiterRegistry::new(),
            recovery: RwLock::new(None),
        }
    }

    /// Attaches the recovery hook. The sync orchestrator and this manager
    /// reference each other, so one side has to be wired late.
    pub fn set_recovery_flow(&self, flow: Arc<dyn RecoveryFlow>) {
        *self.recovery.write() = Some(flow);
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.state.read().connection_id.clone()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.state.read().status.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.read().status.is_connected()
    }

    /// Opens the live connection and waits for the backend to assign an id.
    ///
    /// Completes immediately when an id is already held; refuses in passive
    /// mode. A wait that ends without an id maps to
    /// [`DriftlineError::ConnectionNotEstablished`] carrying the latest
    /// server-initiated disconnect error, if there was one.
    pub async fn connect(&self) -> Result<()> {
        if self.connection_id().is_some() {
            return Ok(());
        }
        if !self.config.active_mode {
            return Err(DriftlineError::ClientInPassiveMode);
        }

        // Register before opening so an id assigned mid-handshake cannot
        // slip past the waiter.
        let pending = self.waiters.register();
        self.transport.connect().await?;

        match self.waiters.await_pending(pending, self.config.waiter_timeout).await {
            Ok(Some(id)) => {
                debug!(connection_id = %id, "connection established");
                Ok(())
            }
            Ok(None) | Err(WaitError::TimedOut) => {
                Err(DriftlineError::ConnectionNotEstablished { underlying: self.server_error() })
            }
            Err(WaitError::Cancelled) => Err(DriftlineError::Cancelled),
        }
    }

    /// Closes the live connection.
    ///
    /// Pending ordinary traffic is flushed and any active recovery run is
    /// cancelled even when there is nothing to close. The transport itself
    /// is only told to close while an id is held and the manager is active;
    /// once closed, the id is dropped and every parked waiter fails.
    pub async fn disconnect(&self, source: DisconnectSource) -> Result<()> {
        self.api.flush_request_queue();
        let recovery = self.recovery.read().as_ref().map(Arc::clone);
        if let Some(recovery) = recovery {
            recovery.cancel_active_run();
        }

        if self.connection_id().is_none() {
            debug!("disconnect requested without a live connection");
            return Ok(());
        }
        if !self.config.active_mode {
            debug!("disconnect requested in passive mode");
            return Ok(());
        }

        info!(source = ?source, "disconnecting");
        self.transport.disconnect(source).await?;

        self.state.write().connection_id = None;
        self.waiters.resolve_all(None);
        Ok(())
    }

    /// Applies a transport state report.
    ///
    /// `on_expired_token` runs at most once, and only for a server-initiated
    /// disconnect carrying the expired-token code. Invalid-credential
    /// disconnects leave waiters parked so the reconnect that follows the
    /// refresh can resolve them with the next id. A `Disconnecting` report
    /// never triggers the hook; waiting for the final `Disconnected` avoids
    /// refreshing twice for one drop.
    pub fn handle_transport_event<F>(&self, new_state: ConnectionState, on_expired_token: F)
    where
        F: FnOnce(),
    {
        {
            let mut state = self.state.write();
            state.connection_id = new_state.connection_id().cloned();
            state.status = new_state.clone();
        }

        match &new_state {
            ConnectionState::Connected { connection_id } => {
                info!(connection_id = %connection_id, "transport connected");
                self.waiters.resolve_all(Some(connection_id.clone()));
            }
            ConnectionState::Disconnected { source } => {
                if source.server_error().is_some_and(ErrorPayload::is_invalid_token) {
                    if source.server_error().is_some_and(ErrorPayload::is_expired_token) {
                        debug!("expired token disconnect; invoking refresh hook");
                        on_expired_token();
                    }
                } else {
                    debug!(source = ?source, "transport disconnected; failing waiters");
                    self.waiters.resolve_all(None);
                }
            }
            ConnectionState::Uninitialized
            | ConnectionState::Connecting
            | ConnectionState::WaitingForConnectionId
            | ConnectionState::Disconnecting { .. } => {}
        }
    }

    /// Returns the cached id or parks until one arrives.
    pub async fn provide_connection_id(&self, timeout: Duration) -> Result<ConnectionId> {
        if let Some(id) = self.connection_id() {
            return Ok(id);
        }
        match self.waiters.wait(timeout).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(DriftlineError::MissingConnectionId),
            Err(WaitError::TimedOut) => Err(DriftlineError::WaiterTimeout { waited: timeout }),
            Err(WaitError::Cancelled) => Err(DriftlineError::Cancelled),
        }
    }

    /// Pins a passive manager's status to a benign disconnect so observers
    /// never see a phantom live connection.
    pub fn force_status_for_passive_mode(&self) {
        if self.config.active_mode {
            return;
        }
        let mut state = self.state.write();
        state.connection_id = None;
        state.status = ConnectionState::Disconnected { source: DisconnectSource::UserInitiated };
    }

    /// Re-points the transport at the endpoint for the new credentials.
    /// An explicit `user_info` wins over the identity derived from the
    /// token.
    pub fn update_endpoint(&self, token: &Token, user_info: Option<&UserInfo>) {
        let connect_as = match user_info {
            Some(info) => info.clone(),
            None => UserInfo::new(token.user_id().clone()),
        };
        self.transport.update_endpoint(token, &connect_as);
    }

    fn server_error(&self) -> Option<ErrorPayload> {
        self.state.read().status.server_error().cloned()
    }
}
