//! Connection lifecycle domain

pub mod manager;
pub mod ports;

pub use manager::*;
pub use ports::*;
