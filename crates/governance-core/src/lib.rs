//! Shared building blocks for the strategy governance pipeline: the domain
//! error type, statistics helpers, the SQLite connection and millisecond
//! time conversions used by every persisted row.

pub mod db;
pub mod error;
pub mod stats;
pub mod time;

pub use db::GovernanceDb;
pub use error::*;
