//! Shared setup for commands: configuration, topology, catalog and rule.

use anyhow::Context;
use clap::Args;
use prodflow::{load_rule, ProdflowConfig, RuleDescriptor, RuleOverrides, RunSelection, Topology};
use prodflow_catalog::SqliteCatalog;
use std::path::{Path, PathBuf};

use crate::cli::error::HelpfulError;

/// Selects one rule of a rule file and overrides its run-time parameters.
#[derive(Args, Debug, Clone)]
pub struct RuleArgs {
    /// YAML rule file
    pub rule_file: PathBuf,

    /// Rule name inside the file
    pub rule: String,

    /// One run, two runs (inclusive range) or an explicit list
    #[arg(conflicts_with = "runlist")]
    pub runs: Vec<String>,

    /// File whose integers are the runs to process
    #[arg(long)]
    pub runlist: Option<PathBuf>,

    /// Run type accepted by run-quality cuts; also fills `{mode}` in directories
    #[arg(long)]
    pub physics_mode: Option<String>,

    /// Maximum number of jobs (0 = no limit)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Ignore existing outputs and recorded status
    #[arg(long)]
    pub resubmit: bool,

    /// Replaces `{prodmode}` in directory templates
    #[arg(long)]
    pub prodmode: Option<String>,

    /// Replace "DST" in output names with this token
    #[arg(long)]
    pub mangle: Option<String>,

    /// Events per job (0 = all)
    #[arg(long)]
    pub nevents: Option<u64>,
}

impl RuleArgs {
    fn run_selection(&self) -> anyhow::Result<RunSelection> {
        let selection = match &self.runlist {
            Some(path) => RunSelection::from_runlist_file(path),
            None => RunSelection::parse_args(&self.runs),
        };
        selection.map_err(|e| HelpfulError::from_prod(e, "reading the run selection").into())
    }

    fn overrides(&self) -> anyhow::Result<RuleOverrides> {
        Ok(RuleOverrides {
            runs: Some(self.run_selection()?),
            physics_mode: self.physics_mode.clone(),
            limit: self.limit,
            resubmit: self.resubmit,
            prodmode: self.prodmode.clone(),
            mangle: self.mangle.clone(),
            nevents: self.nevents,
        })
    }
}

/// Everything a command needs before touching the catalog.
pub struct CommandContext {
    pub config: ProdflowConfig,
    pub topology: Topology,
}

impl CommandContext {
    pub fn load(config_path: Option<&Path>, catalog: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(prodflow_protocol::paths::default_config_path);
        let mut config = ProdflowConfig::load_or_default(&path)
            .map_err(|e| HelpfulError::from_prod(e, &format!("loading {}", path.display())))?;
        if let Some(catalog) = catalog {
            config.catalog_path = catalog;
        }
        let topology = config
            .topology()
            .map_err(|e| HelpfulError::from_prod(e, "loading the dependency topology"))?;
        Ok(Self { config, topology })
    }

    pub fn rule(&self, args: &RuleArgs) -> anyhow::Result<RuleDescriptor> {
        if !args.rule_file.exists() {
            return Err(HelpfulError::file_not_found(&args.rule_file).into());
        }
        let rule = load_rule(&args.rule_file, &args.rule, args.overrides()?, &self.topology)
            .map_err(|e| HelpfulError::from_prod(e, &format!("loading rule '{}'", args.rule)))?;
        Ok(rule)
    }

    pub async fn open_catalog(&self) -> anyhow::Result<SqliteCatalog> {
        let path = &self.config.catalog_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        SqliteCatalog::open(path).await.map_err(|e| {
            HelpfulError::new("Failed to open catalog")
                .with_context(format!("Catalog: {}", path.display()))
                .with_suggestion(format!("Error: {}", e))
                .with_suggestion("TRY: Check catalog_path with: prodflow config")
                .into()
        })
    }
}

/// Single-threaded runtime for the catalog I/O of one command.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
