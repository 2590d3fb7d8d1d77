use std::path::{Path, PathBuf};
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the prodflow home directory.
///
/// Priority:
/// 1) PRODFLOW_HOME
/// 2) the user's home directory
/// 3) ./.prodflow
pub fn prodflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("PRODFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".prodflow");
    }
    PathBuf::from(".").join(".prodflow")
}

fn ensure_home_dir(home: &Path) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create prodflow home directory {}: {}. Set PRODFLOW_HOME or pass --catalog.",
                home.display(),
                err
            );
        });
    }
}

/// Default catalog path: ~/.prodflow/catalog.sqlite3
pub fn default_catalog_path() -> PathBuf {
    let home = prodflow_home();
    ensure_home_dir(&home);
    home.join("catalog.sqlite3")
}

/// Default configuration file: ~/.prodflow/config.toml
pub fn default_config_path() -> PathBuf {
    prodflow_home().join("config.toml")
}

/// Default logs directory: ~/.prodflow/logs
pub fn default_logs_dir() -> PathBuf {
    let home = prodflow_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Default directory for generated submission files: ~/.prodflow/tosubmit
pub fn default_submission_dir() -> PathBuf {
    prodflow_home().join("tosubmit")
}
