//! Command-line interface for prodflow.

pub mod config;
pub mod context;
pub mod error;
pub mod finalize;
pub mod output;
pub mod purge;
pub mod resolve;
pub mod submit;
pub mod topology;

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Some runs could not be looked up; results cover the rest.
    Partial,
}

impl Outcome {
    pub fn from_summary(summary: &prodflow::ResolutionSummary) -> Self {
        if summary.is_complete() {
            Outcome::Done
        } else {
            Outcome::Partial
        }
    }
}
