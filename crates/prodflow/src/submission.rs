//! Submission file pairs for the batch scheduler.
//!
//! For chunk `i` two files are written into the submission directory:
//! `<subbase>_<i>.sub` (shared job description ending in a `queue ... from`
//! statement) and `<subbase>_<i>.in` (one line per job). Nothing is handed
//! to the scheduler here.

use chrono::Utc;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assembler::JobDescriptor;
use crate::batcher::chunk;
use crate::error::{ProdError, Result};
use crate::rule::RuleDescriptor;
use prodflow_catalog::{bounded, StatusCatalog, StatusUpdate};
use prodflow_protocol::ProductionState;

/// One written `.sub`/`.in` pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubmissionFiles {
    pub sub: PathBuf,
    pub queue: PathBuf,
    pub jobs: usize,
}

/// What a submission run wrote and recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubmissionReport {
    pub files: Vec<SubmissionFiles>,
    pub removed_stale: usize,
    pub status_recorded: usize,
}

/// Writes submission files for one rule.
#[derive(Debug, Clone)]
pub struct SubmissionWriter {
    dir: PathBuf,
    chunk_size: usize,
    dry_run: bool,
}

impl SubmissionWriter {
    pub fn new(dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            dir: dir.into(),
            chunk_size,
            dry_run: false,
        }
    }

    /// Write files but leave the status catalog untouched.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all chunks for `jobs`, replacing earlier files of the same
    /// rule, then mark every job `submitting` if a status catalog is given.
    pub async fn write(
        &self,
        rule: &RuleDescriptor,
        jobs: &[JobDescriptor],
        status: Option<(&dyn StatusCatalog, Duration)>,
    ) -> Result<SubmissionReport> {
        let chunks = chunk(jobs, self.chunk_size)?;
        fs::create_dir_all(&self.dir).map_err(|e| ProdError::io(&self.dir, e))?;

        let subbase = rule.submission_base();
        let mut report = SubmissionReport {
            removed_stale: self.remove_stale(&subbase)?,
            ..Default::default()
        };
        if report.removed_stale > 0 {
            warn!(
                subbase = %subbase,
                removed = report.removed_stale,
                "Removed existing submission files"
            );
        }

        for (i, jobs) in chunks.iter().enumerate() {
            let sub = self.dir.join(format!("{subbase}_{i}.sub"));
            let queue = self.dir.join(format!("{subbase}_{i}.in"));
            fs::write(&sub, render_sub(rule, &queue)).map_err(|e| ProdError::io(&sub, e))?;
            fs::write(&queue, render_queue(jobs)).map_err(|e| ProdError::io(&queue, e))?;
            debug!(file = %sub.display(), jobs = jobs.len(), "Wrote submission pair");
            report.files.push(SubmissionFiles {
                sub,
                queue,
                jobs: jobs.len(),
            });
        }

        match status {
            Some((catalog, limit)) if !self.dry_run => {
                report.status_recorded = record_submitting(catalog, limit, jobs).await?;
            }
            Some(_) => info!("Dry run: production status not updated"),
            None => {}
        }

        info!(
            pairs = report.files.len(),
            jobs = jobs.len(),
            dir = %self.dir.display(),
            "Submission files written"
        );
        Ok(report)
    }

    /// Delete `<subbase>_<n>.sub` and `<subbase>_<n>.in` files.
    fn remove_stale(&self, subbase: &str) -> Result<usize> {
        let entries = fs::read_dir(&self.dir).map_err(|e| ProdError::io(&self.dir, e))?;
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ProdError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_submission_file(name, subbase) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| ProdError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_submission_file(name: &str, subbase: &str) -> bool {
    let Some(rest) = name.strip_prefix(subbase).and_then(|r| r.strip_prefix('_')) else {
        return false;
    };
    let Some(index) = rest.strip_suffix(".sub").or_else(|| rest.strip_suffix(".in")) else {
        return false;
    };
    !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
}

fn render_sub(rule: &RuleDescriptor, queue: &Path) -> String {
    let job = rule.job();
    let mut out = String::new();
    let _ = writeln!(out, "universe = vanilla");
    let _ = writeln!(out, "executable = {}", job.script);
    let _ = writeln!(out, "request_memory = {}", job.mem);
    let _ = writeln!(out, "request_disk = {}", job.disk);
    let _ = writeln!(out, "request_cpus = 1");
    let _ = writeln!(out, "priority = {}", job.priority);
    let mut transfer = vec![job.payload.clone()];
    transfer.extend(
        job.rsync
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    let _ = writeln!(out, "transfer_input_files = {}", transfer.join(","));
    if let Some(batch) = &job.batch_name {
        let _ = writeln!(out, "batch_name = \"{batch}\"");
    }
    if let Some(comment) = &job.comment {
        let _ = writeln!(out, "+comment = \"{comment}\"");
    }
    let _ = writeln!(out, "log = $(log)");
    let _ = writeln!(out, "output = $(output)");
    let _ = writeln!(out, "error = $(error)");
    let _ = writeln!(out, "arguments = $(arguments)");
    let _ = writeln!(
        out,
        "queue log,output,error,arguments from {}",
        queue.display()
    );
    out
}

/// One line per job; the scheduler rejects blank and comment lines.
fn render_queue(jobs: &[JobDescriptor]) -> String {
    let mut out = String::new();
    for job in jobs {
        let _ = writeln!(
            out,
            "{}/{}.condor,{}/{}.out,{}/{}.err,{}",
            job.dirs.condor,
            job.logbase,
            job.dirs.logdir,
            job.logbase,
            job.dirs.logdir,
            job.logbase,
            job.arguments.join(" ")
        );
    }
    out
}

async fn record_submitting(
    catalog: &dyn StatusCatalog,
    limit: Duration,
    jobs: &[JobDescriptor],
) -> Result<usize> {
    let now = Utc::now();
    for job in jobs {
        let update = StatusUpdate {
            filename: job.output.clone(),
            dsttype: job.dsttype.clone(),
            run: job.run,
            segment: job.segment,
            state: ProductionState::Submitting,
            timestamp: now,
        };
        bounded("upsert_status", limit, catalog.upsert_status(&update))
            .await
            .map_err(ProdError::from_catalog)?;
    }
    Ok(jobs.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_file_names_are_recognized() {
        let base = "DST_CALO_run2pp_ana472_2024p012_v001";
        assert!(is_submission_file(&format!("{base}_0.sub"), base));
        assert!(is_submission_file(&format!("{base}_12.in"), base));
        assert!(!is_submission_file(&format!("{base}_x.in"), base));
        assert!(!is_submission_file(&format!("{base}_.sub"), base));
        assert!(!is_submission_file(&format!("{base}_1.txt"), base));
        assert!(!is_submission_file(&format!("{base}x_1.sub"), base));
        assert!(!is_submission_file("DST_JETS_run2pp_ana472_2024p012_v001_0.sub", base));
    }
}
