//! Session facade tying the lifecycle services together.
//!
//! `ChatSession` owns one instance of each subsystem and the event loop
//! that feeds transport state transitions into them. The integrator
//! supplies the ports, forwards transport events into the channel handed
//! to [`ChatSession::start`], and talks to the session through the facade
//! methods.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use driftline_domain::{
    ChannelId, ConnectionId, ConnectionState, DisconnectSource, Endpoint, Result, Token, UserId,
    UserInfo,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::ports::{SessionDelegate, TokenProvider};
use crate::auth::{TokenManager, TokenManagerConfig};
use crate::connection::ports::{RecoveryFlow, Transport, TransportEvent};
use crate::connection::{ConnectionManager, ConnectionManagerConfig};
use crate::network_ports::ApiClient;
use crate::offline::ports::{MessageReconciler, RequestStore};
use crate::offline::{OfflineQueueConfig, OfflineRequestQueue};
use crate::sync::ports::{ActiveSessionViews, SyncStore};
use crate::sync::{SyncConfig, SyncService};

/// Lifecycle tuning for the transport event loop.
#[derive(Debug, Clone)]
pub struct SessionEventLoopConfig {
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for SessionEventLoopConfig {
    fn default() -> Self {
        Self { join_timeout: Duration::from_secs(5) }
    }
}

/// Aggregated tuning for every session subsystem.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub token: TokenManagerConfig,
    pub connection: ConnectionManagerConfig,
    pub sync: SyncConfig,
    pub offline: OfflineQueueConfig,
    pub event_loop: SessionEventLoopConfig,
}

/// Everything the embedding application supplies to a session.
pub struct SessionPorts {
    pub api: Arc<dyn ApiClient>,
    pub transport: Arc<dyn Transport>,
    pub delegate: Arc<dyn SessionDelegate>,
    pub sync_store: Arc<dyn SyncStore>,
    pub views: Arc<dyn ActiveSessionViews>,
    pub request_store: Arc<dyn RequestStore>,
    pub reconciler: Arc<dyn MessageReconciler>,
}

/// Facade over the token, connection, sync, and offline subsystems, with
/// explicit lifecycle management for the transport event loop.
pub struct ChatSession {
    token: TokenManager,
    connection: Arc<ConnectionManager>,
    sync: Arc<SyncService>,
    offline: Arc<OfflineRequestQueue>,
    config: SessionEventLoopConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Wires the subsystems together. The session starts idle; call
    /// [`ChatSession::start`] to begin consuming transport events.
    pub fn new(ports: SessionPorts, config: SessionConfig) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&ports.api),
            ports.transport,
            config.connection,
        ));
        let offline = Arc::new(OfflineRequestQueue::new(
            Arc::clone(&ports.api),
            ports.request_store,
            ports.reconciler,
            config.offline,
        ));
        let sync = Arc::new(SyncService::new(
            Arc::clone(&ports.api),
            ports.sync_store,
            ports.views,
            Arc::clone(&offline),
            config.sync,
        ));
        connection.set_recovery_flow(Arc::clone(&sync) as Arc<dyn RecoveryFlow>);
        let token =
            TokenManager::new(ports.api, Arc::clone(&connection), ports.delegate, config.token);
        Self {
            token,
            connection,
            sync,
            offline,
            config: config.event_loop,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Start the event loop, consuming transport events from `events`.
    pub async fn start(
        &mut self,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> std::result::Result<(), String> {
        if self.is_running() {
            return Err("Session event loop already running".to_string());
        }

        info!("Starting session event loop");

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        let connection = Arc::clone(&self.connection);
        let token = self.token.clone();
        let sync = Arc::clone(&self.sync);
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::event_loop(connection, token, sync, events, cancel).await;
        });

        self.task_handle = Some(handle);
        info!("Session event loop started");

        Ok(())
    }

    /// Stop the event loop and wait for it to finish.
    pub async fn stop(&mut self) -> std::result::Result<(), String> {
        if !self.is_running() {
            return Err("Session event loop not running".to_string());
        }

        info!("Stopping session event loop");

        // Cancel background task
        self.cancellation.cancel();

        // Await join handle with timeout
        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Session event loop panicked: {}", e);
                    return Err("Session event loop panicked".to_string());
                }
                Err(_) => {
                    warn!("Session event loop did not stop within timeout");
                    return Err("Session event loop timeout".to_string());
                }
            }
        }

        info!("Session event loop stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true while the event loop task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Connects with a caller-supplied token provider.
    pub async fn connect_user(
        &self,
        user_info: UserInfo,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<()> {
        self.token.connect_user(user_info, provider).await
    }

    /// Connects a guest user; credentials come from the guest endpoint.
    pub async fn connect_guest_user(&self, user_info: UserInfo) -> Result<()> {
        self.token.connect_guest_user(user_info).await
    }

    /// Connects with the shared anonymous identity.
    pub async fn connect_anonymous_user(&self) -> Result<()> {
        self.token.connect_anonymous_user().await
    }

    /// Disconnects and clears the current user's credentials.
    pub async fn log_out_user(&self) -> Result<()> {
        self.connection.disconnect(DisconnectSource::UserInitiated).await?;
        self.token.log_out();
        Ok(())
    }

    /// Waits up to `timeout` for a token to become available.
    pub async fn provide_token(&self, timeout: Duration) -> Result<Token> {
        self.token.provide_token(timeout).await
    }

    /// Forces a fresh token fetch through the installed provider.
    pub async fn refresh_token(&self) -> Result<()> {
        self.token.refresh_token().await
    }

    /// Opens the live connection.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Closes the live connection on the user's behalf.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect(DisconnectSource::UserInitiated).await
    }

    /// Waits up to `timeout` for a connection id to become available.
    pub async fn provide_connection_id(&self, timeout: Duration) -> Result<ConnectionId> {
        self.connection.provide_connection_id(timeout).await
    }

    /// Runs the full local-state sync pipeline.
    pub async fn sync_local_state(&self) -> Result<()> {
        self.sync.sync_local_state().await
    }

    /// Syncs missed events for stored channels, subject to the cooldown.
    pub async fn sync_existing_channels_events(&self) -> Result<Vec<ChannelId>> {
        self.sync.sync_existing_channels_events().await
    }

    /// Persists a mutating request for replay after reconnect.
    pub async fn queue_offline_request(&self, endpoint: Endpoint) -> Result<()> {
        self.offline.queue_offline_request(endpoint).await
    }

    /// Marks a passive-mode session cleanly disconnected.
    pub fn force_status_for_passive_mode(&self) {
        self.connection.force_status_for_passive_mode();
    }

    /// Current connection status.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.status()
    }

    /// Identifier of the connected user, if any.
    pub fn current_user_id(&self) -> Option<UserId> {
        self.token.current_user_id()
    }

    /// Transport event loop.
    async fn event_loop(
        connection: Arc<ConnectionManager>,
        token: TokenManager,
        sync: Arc<SyncService>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session event loop cancelled");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            Self::dispatch_event(&connection, &token, &sync, event).await;
                        }
                        None => {
                            debug!("Transport event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_event(
        connection: &Arc<ConnectionManager>,
        token: &TokenManager,
        sync: &Arc<SyncService>,
        event: TransportEvent,
    ) {
        let state = event.state;
        let connected = state.is_connected();
        let disconnected = matches!(state, ConnectionState::Disconnected { .. });

        connection.handle_transport_event(state, || {
            let token = token.clone();
            tokio::spawn(async move {
                // A successful refresh reconnects on its own.
                if let Err(error) = token.refresh_token().await {
                    warn!(%error, "token refresh after expiry failed");
                }
            });
        });

        if connected {
            sync.record_last_connection(Utc::now());
            let sync = Arc::clone(sync);
            tokio::spawn(async move {
                if let Err(error) = sync.sync_local_state().await {
                    debug!(%error, "post-connection sync ended early");
                }
            });
        } else if disconnected {
            if let Err(error) = sync.record_pending_connection(Utc::now()).await {
                warn!(%error, "could not record the pending connection marker");
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ChatSession dropped while running; cancelling event loop");
            self.cancellation.cancel();
        }
    }
}
