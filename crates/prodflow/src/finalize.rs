//! Registration of produced outputs.
//!
//! Produced files (or spider lines `<path>:<nevents>:...`) are matched
//! against the rule's naming contract, registered in the file catalog under
//! the rule's output tag, and marked `finished` in the status catalog.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::batcher::chunk;
use crate::error::{ProdError, Result};
use crate::rule::RuleDescriptor;
use prodflow_catalog::{bounded, FileCatalog, StatusCatalog, StatusUpdate};
use prodflow_protocol::defaults::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_SUBMIT_CHUNK_SIZE};
use prodflow_protocol::{
    parse_output_filename, CatalogFileRecord, FileStatus, ProductionState,
};

/// One recognized output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishedOutput {
    pub filename: String,
    pub path: String,
    pub dsttype: String,
    pub run: u32,
    pub segment: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub scanned: usize,
    /// Names that do not belong to the rule.
    pub foreign: usize,
    /// Outputs of runs outside the rule's selection.
    pub out_of_selection: usize,
    /// Later entries replaced earlier ones with the same filename.
    pub duplicates: usize,
    pub outputs: Vec<FinishedOutput>,
    pub registered: u64,
    pub dry_run: bool,
}

/// Match `entries` against `rule`, keeping the last entry per filename.
pub fn collect_outputs<S: AsRef<str>>(rule: &RuleDescriptor, entries: &[S]) -> FinalizeReport {
    let stem = rule.output_stem();
    let mut report = FinalizeReport {
        scanned: entries.len(),
        ..Default::default()
    };
    let mut by_name: BTreeMap<String, FinishedOutput> = BTreeMap::new();

    for entry in entries {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }
        let parsed = match parse_output_filename(entry, stem.outtag(), stem.tag()) {
            Ok(parsed) if stem.owns(&parsed) => parsed,
            _ => {
                debug!(entry, "Not an output of this rule");
                report.foreign += 1;
                continue;
            }
        };
        if !rule.runs().contains(parsed.run) {
            report.out_of_selection += 1;
            continue;
        }
        let path = entry.split(':').next().unwrap_or(entry).to_string();
        let filename = Path::new(&path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path.as_str())
            .to_string();
        let output = FinishedOutput {
            filename: filename.clone(),
            path,
            dsttype: parsed.dsttype,
            run: parsed.run,
            segment: parsed.segment,
        };
        if by_name.insert(filename, output).is_some() {
            report.duplicates += 1;
        }
    }

    report.outputs = by_name.into_values().collect();
    report
}

/// Every `*.root` file below `dir`, sorted.
pub fn scan_output_dir(dir: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            ProdError::io(path, std::io::Error::other(e.to_string()))
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("root")
        {
            found.push(entry.path().to_string_lossy().to_string());
        }
    }
    found.sort();
    Ok(found)
}

/// Lines of a spider list file; blank lines are skipped.
pub fn read_output_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| ProdError::io(path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone)]
pub struct FinalizeOptions {
    pub query_timeout: Duration,
    pub chunk_size: usize,
    pub dry_run: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            chunk_size: DEFAULT_SUBMIT_CHUNK_SIZE,
            dry_run: false,
        }
    }
}

/// Register recognized outputs and mark them finished.
pub async fn finalize<S: AsRef<str>>(
    rule: &RuleDescriptor,
    entries: &[S],
    files: &dyn FileCatalog,
    status: &dyn StatusCatalog,
    options: &FinalizeOptions,
) -> Result<FinalizeReport> {
    let mut report = collect_outputs(rule, entries);
    report.dry_run = options.dry_run;
    if report.foreign > 0 {
        warn!(foreign = report.foreign, "Ignored files not produced by this rule");
    }
    if options.dry_run || report.outputs.is_empty() {
        info!(outputs = report.outputs.len(), dry_run = options.dry_run, "Nothing registered");
        return Ok(report);
    }

    let limit = options.query_timeout;
    let tag = rule.outtriplet();
    for outputs in chunk(&report.outputs, options.chunk_size)? {
        let records: Vec<CatalogFileRecord> = outputs
            .iter()
            .map(|o| CatalogFileRecord {
                filename: o.filename.clone(),
                dataset_type: o.dsttype.clone(),
                run: o.run,
                segment: o.segment,
                detector_host: None,
                status: FileStatus::Valid,
            })
            .collect();
        report.registered += bounded("register_files", limit, files.register_files(tag, &records))
            .await
            .map_err(ProdError::from_catalog)?;
    }

    let now = Utc::now();
    for output in &report.outputs {
        let update = StatusUpdate {
            filename: output.filename.clone(),
            dsttype: output.dsttype.clone(),
            run: output.run,
            segment: output.segment,
            state: ProductionState::Finished,
            timestamp: now,
        };
        bounded("upsert_status", limit, status.upsert_status(&update))
            .await
            .map_err(ProdError::from_catalog)?;
    }

    info!(
        rule = rule.name(),
        registered = report.registered,
        "Outputs registered and marked finished"
    );
    Ok(report)
}

/// Paths given on the command line: directories are scanned, files ending
/// in `.root` are taken as outputs, anything else is read as a list file.
pub fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    for path in paths {
        if path.is_dir() {
            entries.extend(scan_output_dir(path)?);
        } else if path.extension().and_then(|e| e.to_str()) == Some("root") {
            entries.push(path.to_string_lossy().to_string());
        } else {
            entries.extend(read_output_list(path)?);
        }
    }
    Ok(entries)
}
