use thiserror::Error;

/// Tolerance allowed between the weight checksum and 1.0.
pub const NORMALIZATION_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Normalization drift: weights sum to {checksum}, expected 1 within {tolerance}")]
    NormalizationDrift { checksum: f64, tolerance: f64 },
}
