//! Authentication tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

/// Authentication token bound to a single user.
///
/// Immutable once issued. The optional expiry instant drives the refresh
/// machinery: an expired token returned by a provider counts as a failed
/// refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    raw: String,
    user_id: UserId,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(
        raw: impl Into<String>,
        user_id: impl Into<UserId>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self { raw: raw.into(), user_id: user_id.into(), expires_at }
    }

    /// Token for an anonymous session: no credential material, fresh user id.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { raw: String::new(), user_id: UserId::anonymous(), expires_at: None }
    }

    /// Unsigned token for development environments with auth checks disabled.
    pub fn development(user_id: impl Into<UserId>) -> Self {
        let user_id = user_id.into();
        Self { raw: format!("dev.{user_id}"), user_id, expires_at: None }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token's expiry instant has passed. Tokens without an
    /// expiry never expire.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn token_without_expiry_never_expires() {
        let token = Token::new("jwt", "luke", None);
        assert!(!token.is_expired());
    }

    #[test]
    fn token_with_future_expiry_is_valid() {
        let token = Token::new("jwt", "luke", Some(Utc::now() + Duration::hours(1)));
        assert!(!token.is_expired());
    }

    #[test]
    fn token_with_past_expiry_is_expired() {
        let token = Token::new("jwt", "luke", Some(Utc::now() - Duration::seconds(1)));
        assert!(token.is_expired());
    }

    #[test]
    fn anonymous_tokens_have_no_credential() {
        let token = Token::anonymous();
        assert!(token.raw().is_empty());
        assert!(!token.is_expired());
    }
}
