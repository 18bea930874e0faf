//! # Driftline Core
//!
//! Session-resilience services - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for the store, transport, and network client
//! - The token, connection, sync, and offline-queue services
//! - The `ChatSession` facade that wires them together
//!
//! ## Architecture Principles
//! - Only depends on `driftline-common` and `driftline-domain`
//! - No database, HTTP, or websocket code
//! - All external dependencies via traits
//! - Pure, testable session logic

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod connection;
pub mod offline;
pub mod session;
pub mod sync;

// Infrastructure ports
pub mod network_ports;

// Mock ports and harness helpers, shared by unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use auth::ports::{SessionDelegate, TokenProvider};
pub use auth::{TokenManager, TokenManagerConfig};
pub use connection::ports::{RecoveryFlow, Transport, TransportEvent};
pub use connection::{ConnectionManager, ConnectionManagerConfig};
pub use network_ports::ApiClient;
pub use offline::ports::{MessageReconciler, RequestStore};
pub use offline::{OfflineQueueConfig, OfflineRequestQueue};
pub use session::{ChatSession, SessionConfig, SessionEventLoopConfig, SessionPorts};
pub use sync::ports::{ActiveSessionViews, SyncStore};
pub use sync::{SyncConfig, SyncService};
