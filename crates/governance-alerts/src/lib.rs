//! Governance Alerts
//!
//! Turns trend signals and calibrated thresholds into typed alerts, persists
//! them with per-(strategy, kind) cooldown dedup and serves keyset-paginated
//! queries and dedup analytics over the persisted history.

pub mod backend;
pub mod engine;
pub mod model;
pub mod query;
pub mod rules;
pub mod sqlite;

pub use backend::{
    AlertBackend, AlertPurgeCounts, KeysetQuery, MemoryAlertBackend, MEMORY_ALERT_CAPACITY,
    MEMORY_DETECTION_CAPACITY,
};
pub use engine::{
    AlertPurgeResult, GovernanceAlertEngine, GovernanceEvaluation, GovernanceParams,
    PersistOutcome, PersistedEvaluation, DEFAULT_COOLDOWN_MS,
};
pub use model::{AlertKind, DetectionRecord, GovernanceAlert, Severity};
pub use query::{
    AlertAnalytics, AlertCursor, AlertFilter, AlertPage, SortOrder, TimeRange, MAX_ALERT_PAGE,
    MAX_QUERY_SPAN_MS,
};
pub use rules::evaluate_rules;
pub use sqlite::SqliteAlertBackend;
