//! Error types for the linkage engine
//!
//! Per-record problems (malformed rows, ambiguous matches, unknown columns) are
//! counted and logged by the pipeline; only integrity violations surface here
//! as errors that abort a run.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, LinkageError>;

#[derive(Error, Debug)]
pub enum LinkageError {
    /// A raw row is missing a required key field
    #[error("Malformed {source_system} record at row {row}: {reason}")]
    MalformedRecord {
        source_system: String,
        row: usize,
        reason: String,
    },

    /// Addresses that carried a geocode before this run would lose it
    #[error("Geocode regression: {count} address(es) would lose a geocode (e.g. {sample:?})")]
    GeocodeRegression { count: usize, sample: Vec<String> },

    /// Two different canonical keys produced the same content-derived identifier
    #[error("Identifier collision on {kind} {id}: '{existing}' vs '{incoming}'")]
    IdentifierCollision {
        kind: String,
        id: String,
        existing: String,
        incoming: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LinkageError {
    /// True for errors that must abort the run before anything is committed
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            LinkageError::GeocodeRegression { .. } | LinkageError::IdentifierCollision { .. }
        )
    }
}
