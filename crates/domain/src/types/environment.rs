//! Classification of a new authentication against the previous session.

use super::user::UserId;

/// How a freshly authenticated user relates to the one the session already
/// knew about. Decides which side effects run before the new token is
/// installed (endpoint re-pointing, stale-state flush, delegate logout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    /// No user was known before.
    FirstConnection,
    /// Same user, fresh credential.
    NewToken,
    /// A different user; the previous session must be logged out first.
    NewUser,
}

impl EnvironmentState {
    /// Compares the previously known user id with the newly authenticated
    /// one.
    #[must_use]
    pub fn classify(current: Option<&UserId>, new: &UserId) -> Self {
        match current {
            None => Self::FirstConnection,
            Some(existing) if existing == new => Self::NewToken,
            Some(_) => Self::NewUser,
        }
    }

    /// Classification used by the connect flow. Guest sessions always force
    /// a logout of whichever user came before, even the same one.
    #[must_use]
    pub fn classify_connection(current: Option<&UserId>, new: &UserId, is_guest: bool) -> Self {
        if is_guest && current.is_some() {
            return Self::NewUser;
        }
        Self::classify(current, new)
    }

    /// Whether the previous user's local state must be torn down.
    #[must_use]
    pub fn requires_logout(self) -> bool {
        matches!(self, Self::NewUser)
    }
}
