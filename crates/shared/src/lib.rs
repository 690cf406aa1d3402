//! Shared types for the phoenix-ports bridge and its host.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
