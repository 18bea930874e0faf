//! Port interface for the HTTP network client
//!
//! The session layer never performs I/O itself; every request goes through
//! this trait. The client is expected to maintain two request lanes: the
//! ordinary lane, which is parked while a token fetch or recovery run is in
//! progress, and the recovery lane, which stays open so that the calls
//! driving the recovery itself are never starved by ordinary traffic.

use async_trait::async_trait;
use driftline_domain::{Endpoint, Result, Token, UserInfo};
use serde_json::Value;

/// Trait for issuing backend requests and steering the client's request lanes
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Execute a request on the ordinary lane
    async fn request(&self, endpoint: &Endpoint) -> Result<Value>;

    /// Execute a request on the recovery lane, bypassing any mode gating
    async fn recovery_request(&self, endpoint: &Endpoint) -> Result<Value>;

    /// Obtain a guest token for the given user from the guest endpoint
    async fn fetch_guest_token(&self, user_info: &UserInfo) -> Result<Token>;

    /// Park ordinary traffic while local state is being rebuilt
    fn enter_recovery_mode(&self);

    /// Re-open the ordinary lane after recovery
    fn exit_recovery_mode(&self);

    /// Park ordinary traffic while a token fetch cycle is running
    fn enter_token_fetch_mode(&self);

    /// Re-open the ordinary lane after the token fetch cycle
    fn exit_token_fetch_mode(&self);

    /// Drop every request parked on the ordinary lane
    fn flush_request_queue(&self);
}
