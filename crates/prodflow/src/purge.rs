//! Removal of production-status rows for a rule's outputs.
//!
//! Deletion is serialized through an advisory lock file so two operators
//! cannot purge the same rule at once.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::batcher::chunk;
use crate::error::{ProdError, Result};
use crate::rule::RuleDescriptor;
use prodflow_catalog::{acquire_lock, bounded, StatusCatalog, StatusQuery};
use prodflow_protocol::defaults::{
    DEFAULT_DELETE_CHUNK_SIZE, DEFAULT_LOCK_MAX_AGE_SECS, DEFAULT_QUERY_TIMEOUT_SECS,
};
use prodflow_protocol::parse_output_filename;

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub lock_path: PathBuf,
    pub lock_max_age: Duration,
    pub chunk_size: usize,
    pub query_timeout: Duration,
    pub dry_run: bool,
}

impl PurgeOptions {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            lock_max_age: Duration::from_secs(DEFAULT_LOCK_MAX_AGE_SECS),
            chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Status rows belonging to the rule in its run selection.
    pub found: usize,
    pub deleted: u64,
    pub chunks: usize,
    pub dry_run: bool,
}

/// Status-row filenames owned by `rule` within its run selection.
pub async fn collect_status_rows(
    rule: &RuleDescriptor,
    status: &dyn StatusCatalog,
    query_timeout: Duration,
) -> Result<Vec<String>> {
    let stem = rule.output_stem();
    let query = StatusQuery {
        filename_prefix: stem.dsttype().to_string(),
        runs: rule.runs().to_filter(),
    };
    let rows = bounded("query_status", query_timeout, status.query_status(&query))
        .await
        .map_err(ProdError::from_catalog)?;

    let mut names: Vec<String> = rows
        .into_iter()
        .filter(|row| {
            parse_output_filename(&row.filename, stem.outtag(), stem.tag())
                .is_ok_and(|parsed| stem.owns(&parsed))
        })
        .map(|row| row.filename)
        .collect();
    names.sort();
    Ok(names)
}

/// Delete the rule's status rows in chunks under the advisory lock.
pub async fn purge(
    rule: &RuleDescriptor,
    status: &dyn StatusCatalog,
    options: &PurgeOptions,
) -> Result<PurgeReport> {
    let names = collect_status_rows(rule, status, options.query_timeout).await?;
    let chunks = chunk(&names, options.chunk_size)?;
    let mut report = PurgeReport {
        found: names.len(),
        chunks: chunks.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };
    if options.dry_run || names.is_empty() {
        info!(rule = rule.name(), found = report.found, dry_run = options.dry_run, "Nothing deleted");
        return Ok(report);
    }

    let _guard = acquire_lock(&options.lock_path, options.lock_max_age, "purge")?;
    for (i, names) in chunks.iter().enumerate() {
        let deleted = bounded(
            "delete_status",
            options.query_timeout,
            status.delete_status(names),
        )
        .await
        .map_err(ProdError::from_catalog)?;
        debug!(chunk = i, deleted, "Deleted status rows");
        report.deleted += deleted;
    }
    info!(rule = rule.name(), deleted = report.deleted, "Purged production status");
    Ok(report)
}
