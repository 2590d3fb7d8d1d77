//! Shared data model for prodflow.
//!
//! Everything that crosses a crate boundary lives here: catalog rows,
//! production states, and the output filename contract that downstream
//! tooling depends on.

pub mod defaults;
pub mod idempotency;
pub mod naming;
pub mod paths;
pub mod types;

pub use idempotency::rule_identity_key;
pub use naming::{
    format_run, format_segment, parse_output_filename, rungroup, NamingError, OutputStem,
    ParsedOutput, MAX_RUN, MAX_SEGMENT,
};
pub use types::{
    CatalogFileRecord, FileStatus, ProductionState, RunInfo, RunSegment, StatusRecord,
};
