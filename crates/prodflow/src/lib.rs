//! prodflow: resolve production rules into batch jobs.
//!
//! A rule names an output dataset type, a build/database-tag triplet and a
//! run selection. [`matcher::resolve`] asks the file and status catalogs
//! which units of work still need a job, [`assembler::JobAssembler`] turns
//! them into job descriptors, and [`submission::SubmissionWriter`] writes
//! them out as scheduler submission files. [`finalize`] and [`purge`]
//! close the loop on the status catalog.

pub mod assembler;
pub mod batcher;
pub mod config;
pub mod error;
pub mod finalize;
pub mod matcher;
pub mod purge;
pub mod rule;
pub mod submission;
pub mod topology;

pub use assembler::{JobAssembler, JobDescriptor, ResourceRequest, SchedulerSlot, FIRST_INPUT_ARG};
pub use batcher::chunk;
pub use config::ProdflowConfig;
pub use error::{ProdError, Result};
pub use finalize::{finalize, FinalizeOptions, FinalizeReport, FinishedOutput};
pub use matcher::{
    resolve, Catalogs, ExclusionReason, MatchResult, QueryFailure, Resolution, ResolutionSummary,
};
pub use purge::{purge, PurgeOptions, PurgeReport};
pub use rule::{
    load_rule, InputSelector, JobTemplate, RuleBuilder, RuleDescriptor, RuleIdentity,
    RuleOverrides, RunQualityCuts, RunSelection,
};
pub use submission::{SubmissionFiles, SubmissionReport, SubmissionWriter};
pub use topology::{FanMode, Leaf, SegmentPolicy, SourceKind, Topology, TopologyEntry};
