//! `prodflow topology`: show the dependency table.

use prodflow::{FanMode, SourceKind, TopologyEntry};

use crate::cli::context::CommandContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::Outcome;

#[derive(Debug)]
pub struct TopologyArgs {
    pub dsttype: Option<String>,
    pub json: bool,
}

pub fn run(ctx: &CommandContext, args: TopologyArgs) -> anyhow::Result<Outcome> {
    match &args.dsttype {
        Some(dsttype) => {
            let entry = ctx
                .topology
                .required_leaves(dsttype)
                .map_err(|e| HelpfulError::from_prod(e, "looking up the dependency table"))?;
            if args.json {
                print_json(entry)?;
            } else {
                print_entry(entry);
            }
        }
        None => {
            let entries: Vec<&TopologyEntry> = ctx.topology.entries().collect();
            if args.json {
                print_json(&entries)?;
            } else {
                let rows = entries.iter().map(|e| summary_row(e)).collect();
                print_table(
                    &["Output", "Source", "Fan", "Segments", "Leaves", "Companions"],
                    rows,
                );
            }
        }
    }
    Ok(Outcome::Done)
}

fn summary_row(entry: &TopologyEntry) -> Vec<String> {
    vec![
        entry.dsttype.clone(),
        match entry.source {
            SourceKind::Raw => "raw",
            SourceKind::Derived => "derived",
        }
        .to_string(),
        match entry.fan {
            FanMode::AllOf => "all-of",
            FanMode::PerLeaf => "per-leaf",
        }
        .to_string(),
        entry.segments.input_mode().to_string(),
        entry.leaves.len().to_string(),
        entry.companions.join(","),
    ]
}

fn print_entry(entry: &TopologyEntry) {
    print_table(
        &["Output", "Source", "Fan", "Segments", "Leaves", "Companions"],
        vec![summary_row(entry)],
    );
    println!();
    let rows = entry
        .leaves
        .iter()
        .map(|leaf| {
            vec![
                leaf.name.clone(),
                leaf.token.clone(),
                entry.output_dsttype(Some(leaf)),
            ]
        })
        .collect();
    print_table(&["Leaf", "Token", "Produces"], rows);
}
