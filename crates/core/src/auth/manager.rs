//! Token lifecycle manager.
//!
//! Owns the current token, the current user identity, and the provider that
//! can mint fresh credentials. Every fetch runs as a single detached retry
//! cycle: concurrent callers coalesce onto it and receive the same outcome,
//! while the cycle itself retries with backoff until it succeeds, hits a
//! terminal error, or exhausts its attempt allowance. The provider slot is
//! re-read on every attempt, so a user switch that lands mid-cycle is
//! picked up by the next attempt instead of poisoning the whole cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftline_common::{RetryStrategy, WaitError, WaiterRegistry};
use driftline_domain::{DriftlineError, EnvironmentState, Result, Token, UserId, UserInfo};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::ports::{SessionDelegate, TokenProvider};
use crate::connection::ConnectionManager;
use crate::network_ports::ApiClient;

/// Tuning knobs for the token lifecycle.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Provider failures tolerated within one fetch cycle.
    pub max_refresh_attempts: u32,
    /// Backoff schedule between failed attempts.
    pub retry: RetryStrategy,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self { max_refresh_attempts: 10, retry: RetryStrategy::default() }
    }
}

#[derive(Default)]
struct AuthState {
    token: Option<Token>,
    user_id: Option<UserId>,
    user_info: Option<UserInfo>,
    provider: Option<Arc<dyn TokenProvider>>,
    /// Bumped on every provider install or removal; lets an in-flight
    /// attempt detect that the session it fetched for was superseded.
    provider_epoch: u64,
}

#[derive(Default)]
struct FetchState {
    in_flight: bool,
    pending: Vec<oneshot::Sender<Result<()>>>,
}

/// Cheap-to-clone handle over the shared token lifecycle state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenManagerInner>,
}

struct TokenManagerInner {
    api: Arc<dyn ApiClient>,
    connection: Arc<ConnectionManager>,
    delegate: Arc<dyn SessionDelegate>,
    config: TokenManagerConfig,
    state: RwLock<AuthState>,
    fetch: Mutex<FetchState>,
    retry: Mutex<RetryStrategy>,
    waiters: WaiterRegistry<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        api: Arc<dyn ApiClient>,
        connection: Arc<ConnectionManager>,
        delegate: Arc<dyn SessionDelegate>,
        config: TokenManagerConfig,
    ) -> Self {
        let retry = config.retry.clone();
        Self {
            inner: Arc::new(TokenManagerInner {
                api,
                connection,
                delegate,
                state: RwLock::new(AuthState::default()),
                fetch: Mutex::new(FetchState::default()),
                retry: Mutex::new(retry),
                waiters: WaiterRegistry::new(),
                config,
            }),
        }
    }

    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.inner.state.read().token.clone()
    }

    #[must_use]
    pub fn current_user_id(&self) -> Option<UserId> {
        self.inner.state.read().user_id.clone()
    }

    /// Connects with a caller-supplied token provider.
    ///
    /// Completes once a token is installed; the transport reconnect it
    /// triggers proceeds in the background.
    pub async fn connect_user(
        &self,
        user_info: UserInfo,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<()> {
        self.begin_session(user_info, provider).await
    }

    /// Connects as a guest. The credential is minted by the backend's guest
    /// issuance endpoint, so refreshes keep working without caller code.
    pub async fn connect_guest_user(&self, user_info: UserInfo) -> Result<()> {
        let mut user_info = user_info;
        user_info.is_guest = true;
        let provider = Arc::new(GuestTokenProvider {
            api: Arc::clone(&self.inner.api),
            user_info: user_info.clone(),
        });
        self.begin_session(user_info, provider).await
    }

    /// Connects without credentials under a fresh anonymous identity.
    pub async fn connect_anonymous_user(&self) -> Result<()> {
        let token = Token::anonymous();
        let user_info = UserInfo::new(token.user_id().clone());
        self.begin_session(user_info, Arc::new(StaticTokenProvider { token })).await
    }

    /// Returns the cached token or parks until the in-flight (or next)
    /// fetch resolves it, bounded by `timeout`.
    pub async fn provide_token(&self, timeout: Duration) -> Result<Token> {
        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        match self.inner.waiters.wait(timeout).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(DriftlineError::MissingToken),
            Err(WaitError::TimedOut) => Err(DriftlineError::WaiterTimeout { waited: timeout }),
            Err(WaitError::Cancelled) => Err(DriftlineError::Cancelled),
        }
    }

    /// Fetches a fresh token through the installed provider. Concurrent
    /// calls share one provider invocation and one outcome.
    pub async fn refresh_token(&self) -> Result<()> {
        if self.inner.state.read().provider.is_none() {
            return Err(DriftlineError::MissingTokenProvider);
        }
        let rx = self.inner.request_fetch();
        rx.await.map_err(|_| DriftlineError::Cancelled)?
    }

    /// Drops the provider, token, and user identity. Parked token waiters
    /// are left alone; they time out normally or pick up the next
    /// session's token.
    pub fn log_out(&self) {
        debug!("logging out current user");
        let mut state = self.inner.state.write();
        state.provider = None;
        state.provider_epoch += 1;
        state.token = None;
        state.user_id = None;
        state.user_info = None;
    }

    /// Uninstalls the provider; the cached token and identity survive.
    pub fn clear_token_provider(&self) {
        let mut state = self.inner.state.write();
        state.provider = None;
        state.provider_epoch += 1;
    }

    async fn begin_session(
        &self,
        user_info: UserInfo,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<()> {
        let inner = &self.inner;
        let environment = {
            let state = inner.state.read();
            EnvironmentState::classify_connection(
                state.user_id.as_ref(),
                &user_info.id,
                user_info.is_guest,
            )
        };
        if environment.requires_logout() {
            info!(user_id = %user_info.id, "user switch; logging out the previous session");
            inner.delegate.log_out_current_user().await?;
            // The previous user id stays so the post-fetch classification
            // still sees the switch; the credential and its waiters go.
            inner.state.write().token = None;
            inner.waiters.resolve_all(None);
        }
        {
            let mut state = inner.state.write();
            state.provider = Some(provider);
            state.provider_epoch += 1;
            state.user_info = Some(user_info);
        }
        let rx = inner.request_fetch();
        rx.await.map_err(|_| DriftlineError::Cancelled)?
    }
}

impl TokenManagerInner {
    /// Appends a completion to the in-flight cycle, or starts a new one.
    fn request_fetch(self: &Arc<Self>) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut fetch = self.fetch.lock();
            let first = !fetch.in_flight;
            fetch.in_flight = true;
            fetch.pending.push(tx);
            first
        };

        if first {
            // A fresh cycle gets its full allowance of attempts.
            self.retry.lock().reset_consecutive_failures();
            self.api.enter_token_fetch_mode();
            tokio::spawn(Arc::clone(self).run_fetch_cycle());
        }
        rx
    }

    /// One fetch cycle: provider attempts with backoff until success, a
    /// terminal error, or exhaustion. Detached from the requesting caller
    /// so a dropped (timed-out) caller cannot strand coalesced completions.
    async fn run_fetch_cycle(self: Arc<Self>) {
        loop {
            let failures = self.retry.lock().consecutive_failures();
            if failures >= self.config.max_refresh_attempts {
                warn!(failures, "token refresh attempts exhausted");
                self.complete_fetch(Err(DriftlineError::TooManyTokenRefreshAttempts));
                return;
            }

            let (provider, epoch) = {
                let state = self.state.read();
                (state.provider.as_ref().map(Arc::clone), state.provider_epoch)
            };
            let Some(provider) = provider else {
                self.complete_fetch(Err(DriftlineError::MissingTokenProvider));
                return;
            };

            match provider.fetch_token().await {
                Ok(token) => {
                    let (mismatch, superseded) = {
                        let state = self.state.read();
                        let mismatch = state
                            .user_info
                            .as_ref()
                            .is_some_and(|info| &info.id != token.user_id());
                        (mismatch, state.provider_epoch != epoch)
                    };
                    if mismatch {
                        if superseded {
                            // A user switch landed mid-attempt; go around
                            // with the freshly installed provider.
                            debug!("discarding token for a superseded session");
                            continue;
                        }
                        warn!(
                            token_user = %token.user_id(),
                            "provider returned a token for a different user"
                        );
                        self.complete_fetch(Err(DriftlineError::TokenForDifferentUser));
                        return;
                    }
                    if !token.is_expired() {
                        self.prepare_environment(token).await;
                        self.complete_fetch(Ok(()));
                        self.spawn_reconnect();
                        return;
                    }
                    debug!("provider returned an expired token; counting as a failed attempt");
                }
                Err(error) => {
                    debug!(error = %error, "token fetch attempt failed");
                }
            }

            let delay = {
                let mut retry = self.retry.lock();
                retry.increment_consecutive_failures();
                (retry.consecutive_failures() < self.config.max_refresh_attempts)
                    .then(|| retry.next_retry_delay())
            };
            let Some(delay) = delay else {
                warn!(
                    max_attempts = self.config.max_refresh_attempts,
                    "token refresh attempts exhausted"
                );
                self.complete_fetch(Err(DriftlineError::TooManyTokenRefreshAttempts));
                return;
            };
            debug!(delay_ms = delay.as_millis() as u64, "retrying token fetch after backoff");
            tokio::time::sleep(delay).await;
        }
    }

    /// Installs a fresh token: re-points the transport, updates identity,
    /// resolves token waiters, and lets the delegate react to the switch.
    async fn prepare_environment(&self, token: Token) {
        let (environment, connect_as) = {
            let state = self.state.read();
            let is_guest = state.user_info.as_ref().is_some_and(|info| info.is_guest);
            let environment = EnvironmentState::classify_connection(
                state.user_id.as_ref(),
                token.user_id(),
                is_guest,
            );
            (environment, state.user_info.clone())
        };

        self.connection.update_endpoint(&token, connect_as.as_ref());

        {
            let mut state = self.state.write();
            state.user_id = Some(token.user_id().clone());
            state.token = Some(token.clone());
        }
        self.retry.lock().reset_consecutive_failures();

        info!(user_id = %token.user_id(), environment = ?environment, "token installed");
        self.waiters.resolve_all(Some(token));
        self.delegate.environment_did_change(environment).await;
    }

    /// Terminates the cycle and drains its completions.
    fn complete_fetch(&self, outcome: Result<()>) {
        let pending = {
            let mut fetch = self.fetch.lock();
            fetch.in_flight = false;
            std::mem::take(&mut fetch.pending)
        };
        self.api.exit_token_fetch_mode();
        for tx in pending {
            let _ = tx.send(outcome.clone());
        }
    }

    /// The reconnect requested by a successful fetch runs detached; its
    /// outcome never affects the fetch completion.
    fn spawn_reconnect(&self) {
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            if let Err(error) = connection.connect().await {
                warn!(error = %error, "reconnect after token refresh failed");
            }
        });
    }
}

/// Provider used for guest sessions: mints tokens through the backend's
/// guest issuance endpoint.
struct GuestTokenProvider {
    api: Arc<dyn ApiClient>,
    user_info: UserInfo,
}

#[async_trait]
impl TokenProvider for GuestTokenProvider {
    async fn fetch_token(&self) -> Result<Token> {
        self.api.fetch_guest_token(&self.user_info).await
    }
}

/// Provider for anonymous and development sessions: hands back the same
/// token every time.
struct StaticTokenProvider {
    token: Token,
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<Token> {
        Ok(self.token.clone())
    }
}
