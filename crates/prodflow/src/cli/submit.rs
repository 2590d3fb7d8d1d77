//! `prodflow submit`: resolve a rule and write scheduler submission files.

use prodflow::{JobAssembler, Resolution, ResolutionSummary, SubmissionReport, SubmissionWriter};
use prodflow_catalog::StatusCatalog;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::cli::context::{runtime, CommandContext, RuleArgs};
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_summary, print_table};
use crate::cli::resolve::resolve_with;
use crate::cli::Outcome;

#[derive(Debug)]
pub struct SubmitArgs {
    pub rule: RuleArgs,
    pub submission_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub dry_run: bool,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SubmitOutput {
    summary: ResolutionSummary,
    submission: SubmissionReport,
    dry_run: bool,
}

pub fn run(ctx: &CommandContext, args: SubmitArgs) -> anyhow::Result<Outcome> {
    let rule = ctx.rule(&args.rule)?;
    let dir = args
        .submission_dir
        .clone()
        .unwrap_or_else(|| ctx.config.submission_dir.clone());
    let writer = SubmissionWriter::new(
        dir,
        args.chunk_size.unwrap_or(ctx.config.submit_chunk_size),
    )
    .dry_run(args.dry_run);

    let rt = runtime()?;
    let (resolution, report) = rt.block_on(async {
        let catalog = ctx.open_catalog().await?;
        let Resolution { results, summary } = resolve_with(ctx, &rule, &catalog).await?;
        let jobs = JobAssembler::new()
            .assemble_all(&rule, &results)
            .map_err(|e| HelpfulError::from_prod(e, "assembling jobs"))?;
        let report = if jobs.is_empty() {
            info!(rule = rule.name(), "No jobs to submit");
            SubmissionReport::default()
        } else {
            let status: &dyn StatusCatalog = &catalog;
            writer
                .write(&rule, &jobs, Some((status, ctx.config.query_timeout())))
                .await
                .map_err(|e| {
                    HelpfulError::from_prod(
                        e,
                        &format!("writing submission files to {}", writer.dir().display()),
                    )
                })?
        };
        catalog.close().await;
        Ok::<_, anyhow::Error>((Resolution { results, summary }, report))
    })?;

    let outcome = Outcome::from_summary(&resolution.summary);
    if args.json {
        print_json(&SubmitOutput {
            summary: resolution.summary,
            submission: report,
            dry_run: args.dry_run,
        })?;
        return Ok(outcome);
    }

    print_summary(&resolution.summary);
    if !report.files.is_empty() {
        println!();
        let rows = report
            .files
            .iter()
            .map(|f| {
                vec![
                    f.sub.display().to_string(),
                    f.queue.display().to_string(),
                    f.jobs.to_string(),
                ]
            })
            .collect();
        print_table(&["Submit file", "Job list", "Jobs"], rows);
    }
    if args.dry_run {
        println!("Dry run: production status not updated.");
    } else if report.status_recorded > 0 {
        println!("Recorded {} jobs as submitting.", report.status_recorded);
    }
    Ok(outcome)
}
