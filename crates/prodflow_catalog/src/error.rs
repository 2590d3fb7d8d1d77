//! Error types for catalog access.

use std::time::Duration;
use thiserror::Error;

/// Catalog operation result type.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Catalog errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog cannot be reached at all.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// A single query failed; the connection itself is still usable.
    #[error("Catalog query failed: {0}")]
    Query(String),

    /// A query did not finish within its time budget.
    #[error("Catalog {operation} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl CatalogError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// True when the failure means the catalog as a whole is unusable,
    /// as opposed to one query going wrong.
    pub fn is_connection_level(&self) -> bool {
        match self {
            CatalogError::Unavailable(_) | CatalogError::Io(_) => true,
            CatalogError::Query(_) | CatalogError::Timeout { .. } => false,
            CatalogError::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Configuration(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CatalogError::Timeout { .. })
    }
}
