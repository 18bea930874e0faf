//! Error types for the session-resilience layer.
//!
//! `DriftlineError` is cloneable: the same failure is often broadcast to
//! every coalesced caller of an in-flight operation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend error codes the session layer reacts to.
pub mod codes {
    use std::ops::RangeInclusive;

    /// The access token has expired and a refresh is worth attempting.
    pub const TOKEN_EXPIRED: i32 = 40;

    /// Credential-rejection range: expired, not yet valid, bad issue date,
    /// bad signature. Only [`TOKEN_EXPIRED`] is refreshable.
    pub const INVALID_TOKEN: RangeInclusive<i32> = 40..=43;
}

/// Error body returned by the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("backend error {code} (status {status_code}): {message}")]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    pub status_code: u16,
}

impl ErrorPayload {
    /// Any credential-rejection code.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        codes::INVALID_TOKEN.contains(&self.code)
    }

    /// Only an expired token triggers the refresh hook; a token with a bad
    /// signature cannot be fixed by refreshing.
    #[must_use]
    pub fn is_expired_token(&self) -> bool {
        self.code == codes::TOKEN_EXPIRED
    }

    /// Backend refusal to enumerate missed events for too large a window.
    /// Treated as success-with-empty by the sync pipeline.
    #[must_use]
    pub fn is_too_many_events(&self) -> bool {
        self.status_code == 400 && self.message.contains("Too many events")
    }
}

/// Driftline session error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriftlineError {
    /// No token provider installed; the caller must connect first.
    #[error("no token provider configured")]
    MissingTokenProvider,

    /// The refresh state machine hit its consecutive-failure bound.
    #[error("too many failed token refreshes")]
    TooManyTokenRefreshAttempts,

    /// A token waiter was resolved without a token becoming available.
    #[error("no token available")]
    MissingToken,

    /// The provider returned a token for a different user than requested.
    #[error("token was issued for another user")]
    TokenForDifferentUser,

    /// A connection-id waiter was resolved without an id becoming available.
    #[error("no connection id available")]
    MissingConnectionId,

    /// `connect` finished without reaching the connected state.
    #[error("connection was not established")]
    ConnectionNotEstablished { underlying: Option<ErrorPayload> },

    /// A passive-mode client never opens a live connection.
    #[error("client is in passive mode")]
    ClientInPassiveMode,

    /// A waiter's deadline elapsed; only that caller is affected.
    #[error("timed out after waiting {waited:?}")]
    WaiterTimeout { waited: Duration },

    /// Could not reach the backend at all.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The backend rejected the call.
    #[error(transparent)]
    Api(#[from] ErrorPayload),

    /// The persistent store reported a failure.
    #[error("store failure: {0}")]
    Store(String),

    /// A payload or queued record could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The surrounding run was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl DriftlineError {
    /// Connectivity failures are kept for a later replay; everything else
    /// queued is discarded as permanently rejected.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_))
    }

    /// Whether a sync-pipeline step hitting this error should be retried
    /// (network or server-side trouble) or skipped (nothing a retry fixes).
    #[must_use]
    pub fn should_retry(&self) -> bool {
        match self {
            Self::ConnectionFailure(_) | Self::WaiterTimeout { .. } => true,
            Self::Api(payload) => payload.status_code >= 500,
            _ => false,
        }
    }

    /// Coarse category used as a structured-log field.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingTokenProvider => "config",
            Self::TooManyTokenRefreshAttempts
            | Self::MissingToken
            | Self::TokenForDifferentUser => "auth",
            Self::MissingConnectionId
            | Self::ConnectionNotEstablished { .. }
            | Self::ClientInPassiveMode
            | Self::ConnectionFailure(_) => "connection",
            Self::WaiterTimeout { .. } => "timeout",
            Self::Api(_) => "api",
            Self::Store(_) => "store",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Convenient result alias for session operations.
pub type Result<T> = std::result::Result<T, DriftlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(code: i32, status_code: u16, message: &str) -> ErrorPayload {
        ErrorPayload { code, message: message.into(), status_code }
    }

    #[test]
    fn the_whole_invalid_token_range_is_recognised() {
        for code in codes::INVALID_TOKEN {
            assert!(payload(code, 401, "nope").is_invalid_token());
        }
        assert!(!payload(39, 401, "nope").is_invalid_token());
        assert!(!payload(44, 401, "nope").is_invalid_token());
    }

    #[test]
    fn only_code_40_is_refreshable() {
        assert!(payload(40, 401, "expired").is_expired_token());
        assert!(!payload(41, 401, "bad signature").is_expired_token());
    }

    #[test]
    fn too_many_events_matches_the_backend_wording() {
        assert!(payload(1, 400, "Too many events to sync").is_too_many_events());
        assert!(!payload(1, 500, "Too many events to sync").is_too_many_events());
        assert!(!payload(1, 400, "something else").is_too_many_events());
    }

    #[test]
    fn retry_classification_follows_the_taxonomy() {
        assert!(DriftlineError::ConnectionFailure("offline".into()).should_retry());
        assert!(DriftlineError::Api(payload(0, 503, "unavailable")).should_retry());
        assert!(!DriftlineError::Api(payload(4, 400, "bad input")).should_retry());
        assert!(!DriftlineError::Store("disabled".into()).should_retry());
        assert!(!DriftlineError::Cancelled.should_retry());
    }

    #[test]
    fn only_connection_failures_keep_queued_records() {
        assert!(DriftlineError::ConnectionFailure("offline".into()).is_connection_failure());
        assert!(!DriftlineError::Api(payload(4, 400, "rejected")).is_connection_failure());
        assert!(!DriftlineError::WaiterTimeout { waited: Duration::from_secs(1) }
            .is_connection_failure());
    }
}
