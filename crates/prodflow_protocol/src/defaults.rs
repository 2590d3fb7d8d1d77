//! Canonical default values shared across prodflow crates.

/// Jobs per submission file pair.
pub const DEFAULT_SUBMIT_CHUNK_SIZE: usize = 1000;
/// Rows per status deletion statement.
pub const DEFAULT_DELETE_CHUNK_SIZE: usize = 5000;
/// Seconds before a single catalog query is abandoned.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
/// Seconds after which an advisory lock file is considered abandoned.
pub const DEFAULT_LOCK_MAX_AGE_SECS: u64 = 30 * 60;
/// Scratch disk requested per job.
pub const DEFAULT_DISK_REQUEST: &str = "10GB";
/// Value substituted for `{prodmode}` in directory templates.
pub const DEFAULT_PRODMODE: &str = "production";
/// Physics mode used when neither rule nor CLI names one.
pub const DEFAULT_PHYSICS_MODE: &str = "physics";
/// Host token of the trigger stream every raw DAQ leaf needs.
pub const GL1_COMPANION: &str = "gl1daq";
