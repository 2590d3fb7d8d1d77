//! `prodflow finalize`: register produced outputs and mark them finished.

use prodflow::finalize::{expand_inputs, finalize, FinalizeOptions, FinalizeReport};
use std::path::PathBuf;

use crate::cli::context::{runtime, CommandContext, RuleArgs};
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::Outcome;

#[derive(Debug)]
pub struct FinalizeArgs {
    pub rule: RuleArgs,
    /// Output directories, `.root` files or spider list files.
    pub from: Vec<PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

pub fn run(ctx: &CommandContext, args: FinalizeArgs) -> anyhow::Result<Outcome> {
    let rule = ctx.rule(&args.rule)?;
    let entries = expand_inputs(&args.from)
        .map_err(|e| HelpfulError::from_prod(e, "collecting produced files"))?;
    let options = FinalizeOptions {
        query_timeout: ctx.config.query_timeout(),
        chunk_size: ctx.config.submit_chunk_size,
        dry_run: args.dry_run,
    };

    let rt = runtime()?;
    let report = rt.block_on(async {
        let catalog = ctx.open_catalog().await?;
        let report = finalize(&rule, &entries, &catalog, &catalog, &options)
            .await
            .map_err(|e| HelpfulError::from_prod(e, &format!("finalizing rule '{}'", rule.name())));
        catalog.close().await;
        Ok::<_, anyhow::Error>(report?)
    })?;

    if args.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(Outcome::Done)
}

fn print_report(report: &FinalizeReport) {
    let rows = vec![
        vec!["scanned".to_string(), report.scanned.to_string()],
        vec!["outputs".to_string(), report.outputs.len().to_string()],
        vec!["foreign".to_string(), report.foreign.to_string()],
        vec!["out of selection".to_string(), report.out_of_selection.to_string()],
        vec!["duplicates".to_string(), report.duplicates.to_string()],
        vec!["registered".to_string(), report.registered.to_string()],
    ];
    print_table(&["Files", "Count"], rows);
    if report.dry_run {
        println!("Dry run: catalogs not updated.");
    }
}
