//! Port interfaces for the token lifecycle.

use async_trait::async_trait;
use driftline_domain::{EnvironmentState, Result, Token};

/// Application-supplied source of credentials.
///
/// Implementations usually call out to the integrator's own backend, which
/// is why every fetch is fallible and retried with backoff.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Produces a fresh token for the user this provider was created for.
    async fn fetch_token(&self) -> Result<Token>;
}

/// Hooks the session layer exposes to the token lifecycle.
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    /// Tears down local state belonging to the previous user.
    async fn log_out_current_user(&self) -> Result<()>;

    /// Observes the environment transition after a token was installed.
    async fn environment_did_change(&self, environment: EnvironmentState);
}
