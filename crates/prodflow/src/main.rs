//! prodflow command-line entry point.

use clap::{Parser, Subcommand};
use prodflow_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

mod cli;

use cli::config::ConfigArgs;
use cli::context::{CommandContext, RuleArgs};
use cli::finalize::FinalizeArgs;
use cli::purge::PurgeArgs;
use cli::resolve::ResolveArgs;
use cli::submit::SubmitArgs;
use cli::topology::TopologyArgs;
use cli::Outcome;

/// Exit status when some runs could not be looked up.
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "prodflow",
    version,
    about = "Resolve production rules into batch jobs"
)]
struct Cli {
    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: ~/.prodflow/config.toml)
    #[arg(long, global = true, env = "PRODFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog database, overriding the configuration
    #[arg(long, global = true, env = "PRODFLOW_CATALOG")]
    catalog: Option<PathBuf>,

    /// Directory for log files (default: ~/.prodflow/logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the units of a rule that still need a job
    Resolve {
        #[command(flatten)]
        rule: RuleArgs,
    },

    /// Resolve a rule and write submission files
    Submit {
        #[command(flatten)]
        rule: RuleArgs,

        /// Where to write submission files (default from config)
        #[arg(long)]
        submission_dir: Option<PathBuf>,

        /// Jobs per submission file pair
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Write files but do not record status
        #[arg(long)]
        dry_run: bool,
    },

    /// Register produced outputs and mark them finished
    Finalize {
        #[command(flatten)]
        rule: RuleArgs,

        /// Output directory, .root file or spider list (repeatable)
        #[arg(long = "from", required = true)]
        from: Vec<PathBuf>,

        /// Report what would be registered without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete production status rows of a rule
    Purge {
        #[command(flatten)]
        rule: RuleArgs,

        /// Count rows without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the dependency topology
    Topology {
        /// Show the leaves of one output type
        dsttype: Option<String>,
    },

    /// Show configuration
    Config {
        /// Write a default config.toml if none exists
        #[arg(long)]
        init: bool,
    },
}

impl Commands {
    /// Log files are grouped per rule; other commands share one directory.
    fn log_name(&self) -> &str {
        match self {
            Commands::Resolve { rule }
            | Commands::Submit { rule, .. }
            | Commands::Finalize { rule, .. }
            | Commands::Purge { rule, .. } => &rule.rule,
            Commands::Topology { .. } | Commands::Config { .. } => "prodflow",
        }
    }
}

fn run_command(cli: Cli) -> anyhow::Result<Outcome> {
    let ctx = CommandContext::load(cli.config.as_deref(), cli.catalog.clone())?;
    debug!(catalog = %ctx.config.catalog_path.display(), "Loaded configuration");
    let json = cli.json;

    match cli.command {
        Commands::Resolve { rule } => cli::resolve::run(&ctx, ResolveArgs { rule, json }),
        Commands::Submit {
            rule,
            submission_dir,
            chunk_size,
            dry_run,
        } => cli::submit::run(
            &ctx,
            SubmitArgs {
                rule,
                submission_dir,
                chunk_size,
                dry_run,
                json,
            },
        ),
        Commands::Finalize {
            rule,
            from,
            dry_run,
        } => cli::finalize::run(
            &ctx,
            FinalizeArgs {
                rule,
                from,
                dry_run,
                json,
            },
        ),
        Commands::Purge { rule, dry_run } => cli::purge::run(
            &ctx,
            PurgeArgs {
                rule,
                dry_run,
                json,
            },
        ),
        Commands::Topology { dsttype } => {
            cli::topology::run(&ctx, TopologyArgs { dsttype, json })
        }
        Commands::Config { init } => cli::config::run(
            &ctx,
            ConfigArgs {
                path: cli.config,
                init,
                json,
            },
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.json;

    let _log_guard = match init_logging(LogConfig {
        app_name: cli.command.log_name(),
        verbosity: cli.verbose,
        log_dir: cli.log_dir.clone(),
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: logging disabled: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Partial) => ExitCode::from(EXIT_PARTIAL),
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
