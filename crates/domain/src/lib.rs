//! # Driftline Domain
//!
//! Chat-session domain types and models for Driftline.
//!
//! This crate contains:
//! - Session data types (Token, UserInfo, ConnectionState, etc.)
//! - Offline request and sync payload models
//! - Domain error types and Result definitions
//!
//! ## Architecture
//! - No dependencies on other Driftline crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
