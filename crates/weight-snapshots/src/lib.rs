//! Weight Snapshots
//!
//! Append-only history of weight artifacts with a durable SQLite backend,
//! an in-memory ring-buffer fallback and a decision-driven auto-snapshot
//! scheduler.

pub mod backend;
pub mod memory;
pub mod scheduler;
pub mod sqlite;
pub mod store;

pub use backend::{BackendKind, SnapshotBackend, WeightSnapshotRow};
pub use memory::MemorySnapshotBackend;
pub use scheduler::{AutoSnapshotOutcome, AutoSnapshotScheduler, SchedulerConfig, SkipReason};
pub use sqlite::SqliteSnapshotBackend;
pub use store::{PurgeResult, SnapshotBatch, SnapshotStore, MAX_SNAPSHOT_PAGE};
