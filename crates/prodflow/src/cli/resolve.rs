//! `prodflow resolve`: show which units of a rule still need a job.

use prodflow::{resolve, Catalogs, MatchResult, Resolution, RuleDescriptor};
use prodflow_catalog::SqliteCatalog;
use serde::Serialize;

use crate::cli::context::{runtime, CommandContext, RuleArgs};
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_summary, print_table};
use crate::cli::Outcome;

#[derive(Debug)]
pub struct ResolveArgs {
    pub rule: RuleArgs,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ResolveOutput<'a> {
    rule: &'a str,
    identity: String,
    #[serde(flatten)]
    resolution: &'a Resolution,
}

pub fn run(ctx: &CommandContext, args: ResolveArgs) -> anyhow::Result<Outcome> {
    let rule = ctx.rule(&args.rule)?;
    let rt = runtime()?;
    let resolution = rt.block_on(async {
        let catalog = ctx.open_catalog().await?;
        let resolution = resolve_with(ctx, &rule, &catalog).await;
        catalog.close().await;
        resolution
    })?;

    if args.json {
        print_json(&ResolveOutput {
            rule: rule.name(),
            identity: rule.identity().key(),
            resolution: &resolution,
        })?;
    } else {
        print_results(&resolution.results);
        println!();
        print_summary(&resolution.summary);
    }
    Ok(Outcome::from_summary(&resolution.summary))
}

/// Resolve `rule` against all three catalogs of `catalog`.
pub async fn resolve_with(
    ctx: &CommandContext,
    rule: &RuleDescriptor,
    catalog: &SqliteCatalog,
) -> anyhow::Result<Resolution> {
    let catalogs = Catalogs::new(catalog, catalog)
        .with_runs(catalog)
        .with_timeout(ctx.config.query_timeout());
    let resolution = resolve(rule, &ctx.topology, &catalogs)
        .await
        .map_err(|e| HelpfulError::from_prod(e, &format!("resolving rule '{}'", rule.name())))?;
    Ok(resolution)
}

fn print_results(results: &[MatchResult]) {
    if results.is_empty() {
        println!("No units need a job.");
        return;
    }
    let rows = results
        .iter()
        .map(|r| {
            vec![
                r.run.to_string(),
                r.segment.to_string(),
                r.leaf.clone().unwrap_or_default(),
                r.output.clone(),
                r.inputs.len().to_string(),
            ]
        })
        .collect();
    print_table(&["Run", "Segment", "Leaf", "Output", "Inputs"], rows);
}
