//! Catalog and production data model shared by every prodflow crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// Validity of a file as recorded in the file catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Valid,
    Invalid,
    #[default]
    Unknown,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Valid => "valid",
            FileStatus::Invalid => "invalid",
            FileStatus::Unknown => "unknown",
        }
    }

    /// Map the integer status column of the file catalog.
    ///
    /// `1` is a good file, zero or negative values mark a bad transfer,
    /// anything else has not been checked yet.
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(1) => FileStatus::Valid,
            Some(c) if c <= 0 => FileStatus::Invalid,
            _ => FileStatus::Unknown,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            FileStatus::Valid => Some(1),
            FileStatus::Invalid => Some(0),
            FileStatus::Unknown => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, FileStatus::Valid)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "valid" | "1" => Ok(FileStatus::Valid),
            "invalid" | "0" => Ok(FileStatus::Invalid),
            "unknown" => Ok(FileStatus::Unknown),
            _ => Err(format!(
                "Invalid file status: '{}'. Expected: valid, invalid, or unknown",
                s
            )),
        }
    }
}

/// Lifecycle of an output in the production-status catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductionState {
    Submitting,
    Submitted,
    Started,
    Running,
    Held,
    Evicted,
    Failed,
    Finished,
}

impl ProductionState {
    pub const ALL: [ProductionState; 8] = [
        ProductionState::Submitting,
        ProductionState::Submitted,
        ProductionState::Started,
        ProductionState::Running,
        ProductionState::Held,
        ProductionState::Evicted,
        ProductionState::Failed,
        ProductionState::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionState::Submitting => "submitting",
            ProductionState::Submitted => "submitted",
            ProductionState::Started => "started",
            ProductionState::Running => "running",
            ProductionState::Held => "held",
            ProductionState::Evicted => "evicted",
            ProductionState::Failed => "failed",
            ProductionState::Finished => "finished",
        }
    }

    /// Output exists and must not be produced again.
    pub fn is_finished(&self) -> bool {
        matches!(self, ProductionState::Finished)
    }

    /// A job for this output is somewhere between submission and completion.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProductionState::Submitting
                | ProductionState::Submitted
                | ProductionState::Started
                | ProductionState::Running
                | ProductionState::Held
        )
    }

    /// Terminal without an output; the unit may be resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProductionState::Failed | ProductionState::Evicted)
    }
}

impl fmt::Display for ProductionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProductionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        ProductionState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == lowered)
            .ok_or_else(|| {
                format!(
                    "Invalid production state: '{}'. Expected one of: {}",
                    s,
                    ProductionState::ALL
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

// ============================================================================
// Units of work and catalog rows
// ============================================================================

/// One candidate unit of work. Ordered by run, then segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunSegment {
    pub run: u32,
    pub segment: u32,
}

impl RunSegment {
    pub fn new(run: u32, segment: u32) -> Self {
        Self { run, segment }
    }
}

impl fmt::Display for RunSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run, self.segment)
    }
}

/// A row of the file catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFileRecord {
    pub filename: String,
    /// Dataset type for derived files; empty for raw DAQ files.
    pub dataset_type: String,
    pub run: u32,
    pub segment: u32,
    /// DAQ host the file was written by (raw files only).
    pub detector_host: Option<String>,
    pub status: FileStatus,
}

impl CatalogFileRecord {
    pub fn unit(&self) -> RunSegment {
        RunSegment::new(self.run, self.segment)
    }

    /// The token a topology leaf is matched against: the host for raw
    /// files, the dataset type otherwise.
    pub fn stream_token(&self) -> &str {
        self.detector_host
            .as_deref()
            .unwrap_or(self.dataset_type.as_str())
    }
}

/// A row of the production-status catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub filename: String,
    pub run: u32,
    pub segment: u32,
    pub state: ProductionState,
    pub submitted: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

/// Run-level bookkeeping from the DAQ run table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run: u32,
    /// Run type as recorded by the DAQ (physics, cosmics, ...).
    pub run_type: String,
    pub events: u64,
    pub duration_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_status_codes() {
        assert_eq!(FileStatus::from_code(Some(1)), FileStatus::Valid);
        assert_eq!(FileStatus::from_code(Some(0)), FileStatus::Invalid);
        assert_eq!(FileStatus::from_code(Some(-3)), FileStatus::Invalid);
        assert_eq!(FileStatus::from_code(Some(7)), FileStatus::Unknown);
        assert_eq!(FileStatus::from_code(None), FileStatus::Unknown);
    }

    #[test]
    fn production_state_parses_case_insensitively() {
        assert_eq!(
            "Finished".parse::<ProductionState>().unwrap(),
            ProductionState::Finished
        );
        assert!("done".parse::<ProductionState>().is_err());
    }

    #[test]
    fn production_state_classes_are_disjoint() {
        for state in ProductionState::ALL {
            let classes = [state.is_finished(), state.is_active(), state.is_retryable()];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{state}");
        }
    }

    #[test]
    fn run_segment_orders_by_run_then_segment() {
        let mut units = vec![
            RunSegment::new(101, 0),
            RunSegment::new(100, 7),
            RunSegment::new(100, 2),
        ];
        units.sort();
        assert_eq!(
            units,
            vec![
                RunSegment::new(100, 2),
                RunSegment::new(100, 7),
                RunSegment::new(101, 0)
            ]
        );
    }

    #[test]
    fn stream_token_prefers_host() {
        let raw = CatalogFileRecord {
            filename: "intt3-00054321-0000.evt".into(),
            dataset_type: String::new(),
            run: 54321,
            segment: 0,
            detector_host: Some("intt3".into()),
            status: FileStatus::Valid,
        };
        assert_eq!(raw.stream_token(), "intt3");
    }
}
