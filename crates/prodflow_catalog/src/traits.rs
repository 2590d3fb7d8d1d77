//! Catalog abstraction traits.
//!
//! The resolver only talks to these interfaces, so the production catalog,
//! the bundled SQLite catalog and the in-memory test catalog are
//! interchangeable.

use async_trait::async_trait;
use prodflow_protocol::{CatalogFileRecord, RunInfo, StatusRecord};
use std::future::Future;
use std::time::Duration;

use crate::error::{CatalogError, Result};
use crate::query::{FileQuery, RunFilter, StatusQuery, StatusUpdate};

/// Liveness of a catalog connection.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Cheap round trip; fails with a connection-level error if the
    /// catalog cannot be used at all.
    async fn health_check(&self) -> Result<()>;
}

/// Read access to the file catalog.
#[async_trait]
pub trait FileCatalog: Catalog {
    /// All rows matching the query, in no particular order.
    async fn query_files(&self, query: &FileQuery) -> Result<Vec<CatalogFileRecord>>;

    /// Distinct runs with at least one row matching the query, ascending.
    async fn list_runs(&self, query: &FileQuery) -> Result<Vec<u32>>;

    /// Record produced outputs under `tag`. Existing rows with the same
    /// filename are replaced. Returns the number of rows written.
    async fn register_files(&self, tag: &str, records: &[CatalogFileRecord]) -> Result<u64>;
}

/// Read/write access to the production-status catalog.
#[async_trait]
pub trait StatusCatalog: Catalog {
    async fn query_status(&self, query: &StatusQuery) -> Result<Vec<StatusRecord>>;

    async fn upsert_status(&self, update: &StatusUpdate) -> Result<()>;

    /// Delete rows by filename. Returns the number of rows removed.
    async fn delete_status(&self, filenames: &[String]) -> Result<u64>;
}

/// Run-level bookkeeping used for run-quality cuts.
#[async_trait]
pub trait RunCatalog: Catalog {
    async fn query_runs(&self, runs: &RunFilter) -> Result<Vec<RunInfo>>;
}

/// Await a catalog call for at most `limit`.
///
/// An elapsed deadline is reported as [`CatalogError::Timeout`], never as an
/// empty answer.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CatalogError::Timeout {
            operation,
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, CatalogError>(vec![1u32])
        };
        let err = bounded("query_files", Duration::from_secs(1), slow)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let fast = async { Ok::<_, CatalogError>(7u32) };
        assert_eq!(bounded("x", Duration::from_secs(1), fast).await.unwrap(), 7);
    }
}
