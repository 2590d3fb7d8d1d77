//! In-memory catalog with fault injection, used by tests and dry runs.

use async_trait::async_trait;
use prodflow_protocol::{CatalogFileRecord, ProductionState, RunInfo, StatusRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CatalogError, Result};
use crate::query::{FileQuery, RunFilter, StatusQuery, StatusUpdate};
use crate::traits::{Catalog, FileCatalog, RunCatalog, StatusCatalog};

#[derive(Default)]
struct State {
    files: BTreeMap<String, (CatalogFileRecord, Option<String>)>,
    status: BTreeMap<String, (String, StatusRecord)>,
    runs: BTreeMap<u32, RunInfo>,
    failing_runs: HashSet<u32>,
    slow_runs: HashMap<u32, Duration>,
    unavailable: bool,
}

/// Catalog held entirely in process memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_file(&self, record: CatalogFileRecord, tag: Option<&str>) {
        self.lock()
            .files
            .insert(record.filename.clone(), (record, tag.map(str::to_string)));
    }

    pub fn add_status(&self, dsttype: &str, record: StatusRecord) {
        self.lock()
            .status
            .insert(record.filename.clone(), (dsttype.to_string(), record));
    }

    pub fn add_run(&self, run: RunInfo) {
        self.lock().runs.insert(run.run, run);
    }

    pub fn status_of(&self, filename: &str) -> Option<ProductionState> {
        self.lock().status.get(filename).map(|(_, rec)| rec.state)
    }

    pub fn status_count(&self) -> usize {
        self.lock().status.len()
    }

    /// File queries constrained to `run` fail with a query error.
    pub fn fail_run(&self, run: u32) {
        self.lock().failing_runs.insert(run);
    }

    /// File queries constrained to `run` take `delay` to answer.
    pub fn slow_run(&self, run: u32, delay: Duration) {
        self.lock().slow_runs.insert(run, delay);
    }

    /// Every call fails with a connection-level error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    async fn enter(&self) -> Result<()> {
        if self.lock().unavailable {
            return Err(CatalogError::unavailable("in-memory catalog marked unavailable"));
        }
        Ok(())
    }

    async fn stall(&self, runs: &RunFilter) {
        let delay = {
            let state = self.lock();
            state
                .slow_runs
                .iter()
                .filter(|(run, _)| runs.contains(**run))
                .map(|(_, delay)| *delay)
                .max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_failing(&self, runs: &RunFilter) -> Result<()> {
        let state = self.lock();
        if let Some(run) = state.failing_runs.iter().find(|run| runs.contains(**run)) {
            return Err(CatalogError::query(format!("injected failure for run {run}")));
        }
        Ok(())
    }

    fn matching(&self, query: &FileQuery) -> Vec<CatalogFileRecord> {
        self.lock()
            .files
            .values()
            .filter(|(record, tag)| query.matches(record, tag.as_deref()))
            .map(|(record, _)| record.clone())
            .collect()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn health_check(&self) -> Result<()> {
        self.enter().await
    }
}

#[async_trait]
impl FileCatalog for InMemoryCatalog {
    async fn query_files(&self, query: &FileQuery) -> Result<Vec<CatalogFileRecord>> {
        self.enter().await?;
        self.stall(&query.runs).await;
        self.check_failing(&query.runs)?;
        Ok(self.matching(query))
    }

    async fn list_runs(&self, query: &FileQuery) -> Result<Vec<u32>> {
        self.enter().await?;
        let runs: BTreeSet<u32> = self.matching(query).iter().map(|r| r.run).collect();
        Ok(runs.into_iter().collect())
    }

    async fn register_files(&self, tag: &str, records: &[CatalogFileRecord]) -> Result<u64> {
        self.enter().await?;
        for record in records {
            self.add_file(record.clone(), Some(tag));
        }
        Ok(records.len() as u64)
    }
}

#[async_trait]
impl StatusCatalog for InMemoryCatalog {
    async fn query_status(&self, query: &StatusQuery) -> Result<Vec<StatusRecord>> {
        self.enter().await?;
        Ok(self
            .lock()
            .status
            .values()
            .filter(|(_, rec)| {
                rec.filename.starts_with(&query.filename_prefix) && query.runs.contains(rec.run)
            })
            .map(|(_, rec)| rec.clone())
            .collect())
    }

    async fn upsert_status(&self, update: &StatusUpdate) -> Result<()> {
        self.enter().await?;
        let mut state = self.lock();
        let previous = state.status.get(&update.filename).map(|(_, r)| r.submitted);
        let (submitted, ended) = match update.state {
            ProductionState::Submitting | ProductionState::Submitted => {
                (Some(update.timestamp), None)
            }
            ProductionState::Finished | ProductionState::Failed | ProductionState::Evicted => {
                (previous.flatten(), Some(update.timestamp))
            }
            _ => (previous.flatten(), None),
        };
        state.status.insert(
            update.filename.clone(),
            (
                update.dsttype.clone(),
                StatusRecord {
                    filename: update.filename.clone(),
                    run: update.run,
                    segment: update.segment,
                    state: update.state,
                    submitted,
                    ended,
                },
            ),
        );
        Ok(())
    }

    async fn delete_status(&self, filenames: &[String]) -> Result<u64> {
        self.enter().await?;
        let mut state = self.lock();
        let removed = filenames
            .iter()
            .filter(|name| state.status.remove(name.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}

#[async_trait]
impl RunCatalog for InMemoryCatalog {
    async fn query_runs(&self, runs: &RunFilter) -> Result<Vec<RunInfo>> {
        self.enter().await?;
        Ok(self
            .lock()
            .runs
            .values()
            .filter(|info| runs.contains(info.run))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prodflow_protocol::FileStatus;

    fn raw(host: &str, run: u32, segment: u32) -> CatalogFileRecord {
        CatalogFileRecord {
            filename: format!("{host}-{run:08}-{segment:04}.evt"),
            dataset_type: String::new(),
            run,
            segment,
            detector_host: Some(host.to_string()),
            status: FileStatus::Valid,
        }
    }

    #[tokio::test]
    async fn failing_run_only_affects_that_run() {
        let catalog = InMemoryCatalog::new();
        catalog.add_file(raw("intt0", 1, 0), None);
        catalog.add_file(raw("intt0", 2, 0), None);
        catalog.fail_run(2);

        let ok = FileQuery::new(RunFilter::Single(1)).host_tokens(["intt0"]);
        assert_eq!(catalog.query_files(&ok).await.unwrap().len(), 1);

        let bad = FileQuery::new(RunFilter::Single(2)).host_tokens(["intt0"]);
        let err = catalog.query_files(&bad).await.unwrap_err();
        assert!(!err.is_connection_level());
    }

    #[tokio::test]
    async fn unavailable_fails_health_check() {
        let catalog = InMemoryCatalog::new();
        catalog.set_unavailable(true);
        assert!(catalog.health_check().await.unwrap_err().is_connection_level());
    }

    #[tokio::test]
    async fn upsert_then_delete() {
        let catalog = InMemoryCatalog::new();
        let update = StatusUpdate {
            filename: "DST_CALO_a_b-00000001-00000.root".into(),
            dsttype: "DST_CALO".into(),
            run: 1,
            segment: 0,
            state: ProductionState::Submitting,
            timestamp: Utc::now(),
        };
        catalog.upsert_status(&update).await.unwrap();
        assert_eq!(
            catalog.status_of(&update.filename),
            Some(ProductionState::Submitting)
        );
        let removed = catalog
            .delete_status(&[update.filename.clone(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(catalog.status_count(), 0);
    }
}
