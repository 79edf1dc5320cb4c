//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Persistence unit for wiki pages.
//!
//! The unit privately owns the page store and its connection pool. Other
//! units reach the pages only through the façade it binds at
//! [`wiki_service::DATABASE_ADDRESS`].
#![warn(missing_docs)]

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened or reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The operation violates a store constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// The query file lacks a required statement.
    #[error("missing query '{0}'")]
    MissingQuery(String),
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a snapshot fails integrity verification.
    #[error("snapshot hash mismatch")]
    HashMismatch,
    /// The connection pool was closed.
    #[error("connection pool is closed")]
    PoolClosed,
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod metrics;
pub mod queries;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod unit;

pub use metrics::StoreMetrics;
pub use queries::{QueryTemplates, SqlQuery};
pub use service::DatabaseService;
pub use snapshot::{load_snapshot, save_snapshot, verify_snapshot, SNAPSHOT_VERSION};
pub use store::{MemoryStore, Page, PageStore};
pub use unit::{DatabaseUnit, DATABASE_UNIT};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_error_display() {
        let err = StoreError::MissingQuery("get-page".into());
        assert_eq!(format!("{err}"), "missing query 'get-page'");
    }
}
