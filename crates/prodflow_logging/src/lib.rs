//! Shared logging setup for prodflow binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "prodflow=info,prodflow_catalog=info";
const MAX_LOG_FILES: usize = 14;

/// Logging configuration for one prodflow invocation.
pub struct LogConfig<'a> {
    /// Rule (or command) name; log files are grouped per rule.
    pub app_name: &'a str,
    /// Number of `-v` flags: 0 info, 1 debug, 2+ trace.
    pub verbosity: u8,
    /// Override for the logs root (defaults to `~/.prodflow/logs`).
    pub log_dir: Option<PathBuf>,
}

/// Filter directive for a verbosity count. `RUST_LOG` wins when set.
pub fn filter_directive(verbosity: u8) -> String {
    match verbosity {
        0 => DEFAULT_LOG_FILTER.to_string(),
        1 => "prodflow=debug,prodflow_catalog=debug".to_string(),
        _ => "prodflow=trace,prodflow_catalog=trace,sqlx=debug".to_string(),
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)))
}

/// Directory holding the log files of one rule: `<logs>/<rule>`.
pub fn rule_log_dir(root: &Path, app_name: &str) -> PathBuf {
    root.join(sanitize_name(app_name))
}

/// Initialize tracing with a daily rolling file writer and stderr output.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. If the log directory cannot be created the
/// file layer is skipped and only stderr logging is installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let root = config
        .log_dir
        .clone()
        .unwrap_or_else(prodflow_protocol::paths::default_logs_dir);
    let dir = rule_log_dir(&root, config.app_name);

    let (file_layer, guard) = match open_file_writer(&dir, config.app_name) {
        Ok((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter(config.verbosity)),
            ),
            Some(guard),
        ),
        Err(err) => {
            eprintln!("Warning: file logging disabled: {:#}", err);
            (None, None)
        }
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(config.verbosity));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn open_file_writer(
    dir: &Path,
    app_name: &str,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(sanitize_name(app_name))
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open rolling log in {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "prodflow".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert!(filter_directive(0).contains("prodflow=info"));
        assert!(filter_directive(1).contains("prodflow=debug"));
        assert!(filter_directive(5).contains("prodflow=trace"));
    }

    #[test]
    fn rule_names_are_sanitized_for_paths() {
        let root = Path::new("/tmp/logs");
        assert_eq!(
            rule_log_dir(root, "DST_CALO run2pp/ana"),
            root.join("DST_CALO_run2pp_ana")
        );
        assert_eq!(sanitize_name(""), "prodflow");
    }

    #[test]
    fn file_writer_creates_rule_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = rule_log_dir(temp.path(), "DST_CALO");
        let (_writer, _guard) = open_file_writer(&dir, "DST_CALO").unwrap();
        assert!(dir.is_dir());
    }
}
