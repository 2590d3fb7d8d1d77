//! `prodflow config`: show or initialize the configuration.

use prodflow::ProdflowConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::context::CommandContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::Outcome;

#[derive(Debug)]
pub struct ConfigArgs {
    pub path: Option<PathBuf>,
    /// Write the defaults if no configuration file exists yet.
    pub init: bool,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConfigOutput<'a> {
    path: &'a Path,
    exists: bool,
    home: PathBuf,
    logs_dir: PathBuf,
    config: &'a ProdflowConfig,
}

pub fn run(ctx: &CommandContext, args: ConfigArgs) -> anyhow::Result<Outcome> {
    let path = args
        .path
        .clone()
        .unwrap_or_else(prodflow_protocol::paths::default_config_path);

    if args.init && !path.exists() {
        ProdflowConfig::default()
            .save(&path)
            .map_err(|e| HelpfulError::from_prod(e, "writing the default configuration"))?;
        println!("Wrote {}", path.display());
    }

    let output = ConfigOutput {
        path: &path,
        exists: path.exists(),
        home: prodflow_protocol::paths::prodflow_home(),
        logs_dir: prodflow_protocol::paths::default_logs_dir(),
        config: &ctx.config,
    };
    if args.json {
        print_json(&output)?;
        return Ok(Outcome::Done);
    }

    let config = output.config;
    let topology = config
        .topology_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(built-in)".to_string());
    let rows = vec![
        vec![
            "config file".to_string(),
            format!(
                "{}{}",
                path.display(),
                if output.exists { "" } else { " (not found, defaults)" }
            ),
        ],
        vec!["home".to_string(), output.home.display().to_string()],
        vec!["logs".to_string(), output.logs_dir.display().to_string()],
        vec!["catalog_path".to_string(), config.catalog_path.display().to_string()],
        vec!["query_timeout_secs".to_string(), config.query_timeout_secs.to_string()],
        vec!["submit_chunk_size".to_string(), config.submit_chunk_size.to_string()],
        vec!["delete_chunk_size".to_string(), config.delete_chunk_size.to_string()],
        vec!["lock_max_age_secs".to_string(), config.lock_max_age_secs.to_string()],
        vec!["submission_dir".to_string(), config.submission_dir.display().to_string()],
        vec!["topology_file".to_string(), topology],
    ];
    print_table(&["Setting", "Value"], rows);
    Ok(Outcome::Done)
}
