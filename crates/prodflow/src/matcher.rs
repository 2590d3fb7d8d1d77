//! Rule resolution: from a rule and the catalogs to the list of jobs that
//! still need to run.
//!
//! Resolution is strictly sequential. For every candidate run the file
//! catalog is asked once for all upstream tokens, units are formed according
//! to the topology entry's segment policy and fan mode, incomplete units
//! are dropped, and complete ones are checked against outputs that already
//! exist or are in flight.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ProdError, Result};
use crate::rule::RuleDescriptor;
use crate::topology::{FanMode, Leaf, SegmentPolicy, SourceKind, Topology, TopologyEntry};
use prodflow_catalog::{
    bounded, CatalogError, FileCatalog, FileQuery, RunCatalog, RunFilter, SegmentFilter,
    StatusCatalog, StatusQuery,
};
use prodflow_protocol::defaults::DEFAULT_QUERY_TIMEOUT_SECS;
use prodflow_protocol::{CatalogFileRecord, OutputStem, ProductionState, RunInfo, RunSegment};

/// Why a candidate did not become a job. Normal control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// A required leaf or companion has no valid file.
    IncompleteInputs,
    /// The output exists or is recorded as finished.
    DuplicateOutput,
    /// A job for the output is queued or running.
    InProgress,
    /// The run's catalog lookup failed or timed out (counts runs).
    CatalogQueryFailed,
    /// The run failed run-quality cuts (counts runs).
    RunQuality,
    /// Cut by the rule's job limit.
    LimitReached,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::IncompleteInputs => "incomplete_inputs",
            ExclusionReason::DuplicateOutput => "duplicate_output",
            ExclusionReason::InProgress => "in_progress",
            ExclusionReason::CatalogQueryFailed => "catalog_query_failed",
            ExclusionReason::RunQuality => "run_quality",
            ExclusionReason::LimitReached => "limit_reached",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work with its resolved inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub run: u32,
    pub segment: u32,
    /// Leaf name for per-leaf outputs.
    pub leaf: Option<String>,
    /// Host token of a per-leaf raw output.
    pub host: Option<String>,
    /// Dataset type of the output, also its leaf directory.
    pub output_dsttype: String,
    pub stem: OutputStem,
    pub output: String,
    /// Companion files first, then leaves in topology order.
    pub inputs: Vec<String>,
    pub policy: SegmentPolicy,
    pub complete: bool,
}

impl MatchResult {
    pub fn unit(&self) -> RunSegment {
        RunSegment::new(self.run, self.segment)
    }

    fn sort_key(&self) -> (u32, u32, &str) {
        (self.run, self.segment, self.leaf.as_deref().unwrap_or(""))
    }
}

/// A run whose lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFailure {
    pub run: u32,
    pub message: String,
    pub timed_out: bool,
}

/// Accounting of one resolution, so "nothing to do" can be told apart
/// from "could not look".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    /// Units formed from catalog rows.
    pub candidates: usize,
    pub matched: usize,
    pub excluded: BTreeMap<ExclusionReason, usize>,
    pub failures: Vec<QueryFailure>,
}

impl ResolutionSummary {
    fn exclude(&mut self, reason: ExclusionReason, count: usize) {
        if count > 0 {
            *self.excluded.entry(reason).or_default() += count;
        }
    }

    fn record_failure(&mut self, run: u32, err: &CatalogError) {
        warn!(run, error = %err, "Catalog lookup failed; run skipped");
        self.exclude(ExclusionReason::CatalogQueryFailed, 1);
        self.failures.push(QueryFailure {
            run,
            message: err.to_string(),
            timed_out: err.is_timeout(),
        });
    }

    pub fn excluded(&self, reason: ExclusionReason) -> usize {
        self.excluded.get(&reason).copied().unwrap_or(0)
    }

    /// True if every run could be looked up.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub results: Vec<MatchResult>,
    pub summary: ResolutionSummary,
}

/// Catalog handles used by one resolution.
pub struct Catalogs<'a> {
    pub files: &'a dyn FileCatalog,
    pub status: &'a dyn StatusCatalog,
    /// Needed only for run-quality cuts.
    pub runs: Option<&'a dyn RunCatalog>,
    /// Budget of each individual catalog call.
    pub query_timeout: Duration,
}

impl<'a> Catalogs<'a> {
    pub fn new(files: &'a dyn FileCatalog, status: &'a dyn StatusCatalog) -> Self {
        Self {
            files,
            status,
            runs: None,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_runs(mut self, runs: &'a dyn RunCatalog) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Resolve `rule` into the units that still need a job.
///
/// Connection-level failures abort with [`ProdError::CatalogUnavailable`]
/// and no partial result. A failing or slow lookup of a single run is
/// recorded in the summary and the run is skipped.
pub async fn resolve(
    rule: &RuleDescriptor,
    topology: &Topology,
    catalogs: &Catalogs<'_>,
) -> Result<Resolution> {
    let entry = topology.required_leaves(rule.input_dsttype())?;
    let limit = catalogs.query_timeout;

    bounded("health_check", limit, catalogs.files.health_check())
        .await
        .map_err(ProdError::CatalogUnavailable)?;
    bounded("health_check", limit, catalogs.status.health_check())
        .await
        .map_err(ProdError::CatalogUnavailable)?;

    let mut summary = ResolutionSummary::default();
    let mut results = Vec::new();
    let stem = rule.output_stem();

    let discovery = upstream_query(entry, rule, rule.runs().to_filter(), false);
    let mut runs = bounded("list_runs", limit, catalogs.files.list_runs(&discovery))
        .await
        .map_err(ProdError::from_catalog)?;
    debug!(rule = rule.name(), runs = runs.len(), "Candidate runs");

    if rule.quality().is_active() && !runs.is_empty() {
        match catalogs.runs {
            Some(run_catalog) => {
                let filter = RunFilter::List(runs.clone());
                let infos = bounded("query_runs", limit, run_catalog.query_runs(&filter))
                    .await
                    .map_err(ProdError::from_catalog)?;
                let by_run: HashMap<u32, &RunInfo> = infos.iter().map(|i| (i.run, i)).collect();
                let before = runs.len();
                runs.retain(|run| {
                    let keep = by_run
                        .get(run)
                        .is_some_and(|info| passes_quality(rule, info));
                    if !keep {
                        debug!(run, "Run fails quality cuts");
                    }
                    keep
                });
                summary.exclude(ExclusionReason::RunQuality, before - runs.len());
            }
            None => warn!(
                rule = rule.name(),
                "Run-quality cuts configured but no run catalog available; cuts not applied"
            ),
        }
    }

    for run in runs {
        let query = upstream_query(entry, rule, RunFilter::Single(run), true);
        let records = match bounded("query_files", limit, catalogs.files.query_files(&query)).await
        {
            Ok(records) => records,
            Err(err) if err.is_connection_level() => {
                return Err(ProdError::CatalogUnavailable(err))
            }
            Err(err) => {
                summary.record_failure(run, &err);
                continue;
            }
        };

        let units = form_units(entry, &stem, run, &records)?;
        summary.candidates += units.len();
        let (complete, incomplete): (Vec<_>, Vec<_>) = units.into_iter().partition(|u| u.complete);
        for unit in &incomplete {
            debug!(run, segment = unit.segment, leaf = ?unit.leaf, "Incomplete inputs");
        }
        summary.exclude(ExclusionReason::IncompleteInputs, incomplete.len());
        if complete.is_empty() {
            continue;
        }

        if rule.resubmit() {
            results.extend(complete);
            continue;
        }

        let (present, states) = match existing_outputs(rule, &stem, run, &complete, catalogs).await
        {
            Ok(found) => found,
            Err(err) if err.is_connection_level() => {
                return Err(ProdError::CatalogUnavailable(err))
            }
            Err(err) => {
                summary.record_failure(run, &err);
                continue;
            }
        };

        for unit in complete {
            let state = states.get(unit.output.as_str()).copied();
            if present.contains(unit.output.as_str()) || state.is_some_and(|s| s.is_finished()) {
                debug!(output = %unit.output, "Output already produced");
                summary.exclude(ExclusionReason::DuplicateOutput, 1);
            } else if state.is_some_and(|s| s.is_active()) {
                debug!(output = %unit.output, state = ?state, "Output in progress");
                summary.exclude(ExclusionReason::InProgress, 1);
            } else {
                results.push(unit);
            }
        }
    }

    results.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    if rule.limit() > 0 && results.len() > rule.limit() {
        summary.exclude(ExclusionReason::LimitReached, results.len() - rule.limit());
        results.truncate(rule.limit());
    }
    summary.matched = results.len();

    info!(
        rule = rule.name(),
        candidates = summary.candidates,
        matched = summary.matched,
        failures = summary.failures.len(),
        "Resolution finished"
    );
    Ok(Resolution { results, summary })
}

fn passes_quality(rule: &RuleDescriptor, info: &RunInfo) -> bool {
    let cuts = rule.quality();
    (!cuts.require_run_type || info.run_type.eq_ignore_ascii_case(rule.physics_mode()))
        && info.events >= cuts.min_events
        && info.duration_secs >= cuts.min_duration_secs
}

/// File query for an entry's upstream tokens. Discovery only needs the
/// leaves; per-run lookups include companions.
fn upstream_query(
    entry: &TopologyEntry,
    rule: &RuleDescriptor,
    runs: RunFilter,
    with_companions: bool,
) -> FileQuery {
    let tokens: Vec<String> = if with_companions {
        entry.all_tokens()
    } else {
        entry.leaf_tokens().map(str::to_string).collect()
    };
    let segments = match entry.segments {
        SegmentPolicy::FirstSegmentOnly => SegmentFilter::Only(0),
        SegmentPolicy::PerSegment | SegmentPolicy::WholeRun => SegmentFilter::All,
    };
    let query = FileQuery::new(runs).segments(segments);
    match entry.source {
        SourceKind::Raw => query.host_tokens(tokens),
        SourceKind::Derived => query.dataset_types(tokens).tag(rule.input().tag.clone()),
    }
}

fn token_of(record: &CatalogFileRecord, source: SourceKind) -> &str {
    match source {
        SourceKind::Raw => record.stream_token(),
        SourceKind::Derived => record.dataset_type.as_str(),
    }
}

/// A leaf (or companion) is satisfied by at least one valid file; a
/// whole-run unit additionally needs every file to be valid.
fn satisfied(files: &[&CatalogFileRecord], policy: SegmentPolicy) -> bool {
    match policy {
        SegmentPolicy::WholeRun => !files.is_empty() && files.iter().all(|f| f.status.is_valid()),
        SegmentPolicy::PerSegment | SegmentPolicy::FirstSegmentOnly => {
            files.iter().any(|f| f.status.is_valid())
        }
    }
}

fn valid_names(files: &[&CatalogFileRecord]) -> Vec<String> {
    let mut names: Vec<String> = files
        .iter()
        .filter(|f| f.status.is_valid())
        .map(|f| f.filename.clone())
        .collect();
    names.sort();
    names
}

/// Group one run's rows into units and decide completeness.
fn form_units(
    entry: &TopologyEntry,
    stem: &OutputStem,
    run: u32,
    records: &[CatalogFileRecord],
) -> Result<Vec<MatchResult>> {
    let leaf_tokens: HashSet<&str> = entry.leaf_tokens().collect();

    let segment_keys: BTreeSet<u32> = match entry.segments {
        SegmentPolicy::WholeRun => {
            if records.is_empty() {
                BTreeSet::new()
            } else {
                BTreeSet::from([0])
            }
        }
        SegmentPolicy::PerSegment | SegmentPolicy::FirstSegmentOnly => records
            .iter()
            .filter(|r| leaf_tokens.contains(token_of(r, entry.source)))
            .map(|r| r.segment)
            .collect(),
    };

    let mut units = Vec::new();
    for segment in segment_keys {
        let mut by_token: HashMap<&str, Vec<&CatalogFileRecord>> = HashMap::new();
        for record in records {
            if entry.segments != SegmentPolicy::WholeRun && record.segment != segment {
                continue;
            }
            by_token
                .entry(token_of(record, entry.source))
                .or_default()
                .push(record);
        }
        let files_of = |token: &str| by_token.get(token).map(Vec::as_slice).unwrap_or(&[]);

        let companions_ok = entry
            .companions
            .iter()
            .all(|c| satisfied(files_of(c), entry.segments));
        let companion_inputs: Vec<String> = entry
            .companions
            .iter()
            .flat_map(|c| valid_names(files_of(c)))
            .collect();

        match entry.fan {
            FanMode::AllOf => {
                let complete = companions_ok
                    && entry
                        .leaves
                        .iter()
                        .all(|leaf| satisfied(files_of(&leaf.token), entry.segments));
                let mut inputs = companion_inputs;
                for leaf in &entry.leaves {
                    inputs.extend(valid_names(files_of(&leaf.token)));
                }
                units.push(unit(entry, stem.clone(), None, run, segment, inputs, complete)?);
            }
            FanMode::PerLeaf => {
                for leaf in &entry.leaves {
                    let files = files_of(&leaf.token);
                    if files.is_empty() {
                        continue;
                    }
                    let complete = companions_ok && satisfied(files, entry.segments);
                    let mut inputs = companion_inputs.clone();
                    inputs.extend(valid_names(files));
                    units.push(unit(
                        entry,
                        stem.for_leaf(&leaf.name),
                        Some(leaf),
                        run,
                        segment,
                        inputs,
                        complete,
                    )?);
                }
            }
        }
    }
    Ok(units)
}

fn unit(
    entry: &TopologyEntry,
    stem: OutputStem,
    leaf: Option<&Leaf>,
    run: u32,
    segment: u32,
    inputs: Vec<String>,
    complete: bool,
) -> Result<MatchResult> {
    let output = stem.filename(run, segment)?;
    let host = match (leaf, entry.source) {
        (Some(leaf), SourceKind::Raw) => Some(leaf.token.clone()),
        _ => None,
    };
    Ok(MatchResult {
        run,
        segment,
        leaf: leaf.map(|l| l.name.clone()),
        host,
        output_dsttype: stem.dsttype().to_string(),
        stem,
        output,
        inputs,
        policy: entry.segments,
        complete,
    })
}

/// Outputs of `run` already in the file catalog, and their recorded states.
async fn existing_outputs(
    rule: &RuleDescriptor,
    stem: &OutputStem,
    run: u32,
    units: &[MatchResult],
    catalogs: &Catalogs<'_>,
) -> std::result::Result<(HashSet<String>, HashMap<String, ProductionState>), CatalogError> {
    let limit = catalogs.query_timeout;
    let types: BTreeSet<&str> = units.iter().map(|u| u.output_dsttype.as_str()).collect();
    let query = FileQuery::new(RunFilter::Single(run))
        .dataset_types(types)
        .tag(Some(rule.outtriplet().to_string()));
    let present = bounded("query_files", limit, catalogs.files.query_files(&query))
        .await?
        .into_iter()
        .map(|record| record.filename)
        .collect();

    let status_query = StatusQuery {
        filename_prefix: stem.dsttype().to_string(),
        runs: RunFilter::Single(run),
    };
    let states = bounded("query_status", limit, catalogs.status.query_status(&status_query))
        .await?
        .into_iter()
        .map(|record| (record.filename, record.state))
        .collect();

    Ok((present, states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodflow_protocol::FileStatus;

    fn file(name: &str, status: FileStatus) -> CatalogFileRecord {
        CatalogFileRecord {
            filename: name.to_string(),
            dataset_type: String::new(),
            run: 1,
            segment: 0,
            detector_host: Some("h".into()),
            status,
        }
    }

    #[test]
    fn per_segment_needs_one_valid_file() {
        let good = file("a", FileStatus::Valid);
        let bad = file("b", FileStatus::Invalid);
        assert!(satisfied(&[&bad, &good], SegmentPolicy::PerSegment));
        assert!(!satisfied(&[&bad], SegmentPolicy::PerSegment));
        assert!(!satisfied(&[], SegmentPolicy::PerSegment));
    }

    #[test]
    fn whole_run_needs_every_file_valid() {
        let good = file("a", FileStatus::Valid);
        let unknown = file("b", FileStatus::Unknown);
        assert!(satisfied(&[&good], SegmentPolicy::WholeRun));
        assert!(!satisfied(&[&good, &unknown], SegmentPolicy::WholeRun));
        assert!(!satisfied(&[], SegmentPolicy::WholeRun));
    }

    #[test]
    fn valid_names_are_sorted_and_filtered() {
        let b = file("b", FileStatus::Valid);
        let a = file("a", FileStatus::Valid);
        let c = file("c", FileStatus::Invalid);
        assert_eq!(valid_names(&[&b, &c, &a]), vec!["a", "b"]);
    }

    #[test]
    fn summary_counts_by_reason() {
        let mut summary = ResolutionSummary::default();
        summary.exclude(ExclusionReason::InProgress, 2);
        summary.exclude(ExclusionReason::InProgress, 1);
        summary.exclude(ExclusionReason::LimitReached, 0);
        assert_eq!(summary.excluded(ExclusionReason::InProgress), 3);
        assert!(!summary.excluded.contains_key(&ExclusionReason::LimitReached));
        summary.record_failure(7, &CatalogError::query("boom"));
        assert!(!summary.is_complete());
        assert_eq!(summary.excluded(ExclusionReason::CatalogQueryFailed), 1);
    }
}
