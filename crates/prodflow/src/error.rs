//! Error types for rule resolution and job construction.

use prodflow_catalog::{CatalogError, LockError};
use prodflow_protocol::NamingError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProdError>;

#[derive(Error, Debug)]
pub enum ProdError {
    #[error("Unknown dataset type '{0}'")]
    UnknownDatasetType(String),

    #[error("Invalid run selection: {0}")]
    InvalidRunSelection(String),

    /// The catalog could not be used at all; nothing was resolved.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(#[source] CatalogError),

    /// A whole-selection catalog query failed (run discovery, run quality).
    #[error("Catalog query failed: {0}")]
    CatalogQuery(#[source] CatalogError),

    #[error("Run number {0} does not fit in 8 digits")]
    RunNumberOverflow(u32),

    #[error("Segment number {0} does not fit in 5 digits")]
    SegmentOverflow(u32),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Dependency topology has a cycle through {0}")]
    CyclicTopology(String),

    #[error("Chunk size must be positive")]
    InvalidChunkSize,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl ProdError {
    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        Self::InvalidRule(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a catalog error, keeping connection-level failures distinct.
    pub fn from_catalog(err: CatalogError) -> Self {
        if err.is_connection_level() {
            Self::CatalogUnavailable(err)
        } else {
            Self::CatalogQuery(err)
        }
    }
}

impl From<NamingError> for ProdError {
    fn from(err: NamingError) -> Self {
        match err {
            NamingError::RunNumberOverflow { run } => Self::RunNumberOverflow(run),
            NamingError::SegmentOverflow { segment } => Self::SegmentOverflow(segment),
            NamingError::Unparseable { name, reason } => {
                Self::InvalidRule(format!("cannot parse '{name}': {reason}"))
            }
        }
    }
}
