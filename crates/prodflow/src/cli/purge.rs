//! `prodflow purge`: delete production-status rows of a rule.

use prodflow::purge::{purge, PurgeOptions};
use prodflow_catalog::lock_path_for;

use crate::cli::context::{runtime, CommandContext, RuleArgs};
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::Outcome;

#[derive(Debug)]
pub struct PurgeArgs {
    pub rule: RuleArgs,
    pub dry_run: bool,
    pub json: bool,
}

pub fn run(ctx: &CommandContext, args: PurgeArgs) -> anyhow::Result<Outcome> {
    let rule = ctx.rule(&args.rule)?;
    let dir = &ctx.config.submission_dir;
    std::fs::create_dir_all(dir).map_err(|e| {
        HelpfulError::new(format!("Cannot create {}", dir.display())).with_context(e.to_string())
    })?;
    let options = PurgeOptions {
        lock_path: lock_path_for(&dir.join(rule.submission_base())),
        lock_max_age: ctx.config.lock_max_age(),
        chunk_size: ctx.config.delete_chunk_size,
        query_timeout: ctx.config.query_timeout(),
        dry_run: args.dry_run,
    };

    let rt = runtime()?;
    let report = rt.block_on(async {
        let catalog = ctx.open_catalog().await?;
        let report = purge(&rule, &catalog, &options)
            .await
            .map_err(|e| HelpfulError::from_prod(e, &format!("purging rule '{}'", rule.name())));
        catalog.close().await;
        Ok::<_, anyhow::Error>(report?)
    })?;

    if args.json {
        print_json(&report)?;
        return Ok(Outcome::Done);
    }
    print_table(
        &["Status rows", "Deleted", "Chunks"],
        vec![vec![
            report.found.to_string(),
            report.deleted.to_string(),
            report.chunks.to_string(),
        ]],
    );
    if report.dry_run {
        println!("Dry run: nothing deleted.");
    }
    Ok(Outcome::Done)
}
