//! Query and update shapes shared by every catalog backend.

use chrono::{DateTime, Utc};
use prodflow_protocol::ProductionState;
use serde::{Deserialize, Serialize};

/// Run constraint of a catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFilter {
    All,
    Single(u32),
    /// Inclusive on both ends.
    Range { first: u32, last: u32 },
    List(Vec<u32>),
}

impl RunFilter {
    pub fn contains(&self, run: u32) -> bool {
        match self {
            RunFilter::All => true,
            RunFilter::Single(r) => *r == run,
            RunFilter::Range { first, last } => (*first..=*last).contains(&run),
            RunFilter::List(runs) => runs.contains(&run),
        }
    }
}

/// Segment constraint of a file query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFilter {
    #[default]
    All,
    Only(u32),
}

impl SegmentFilter {
    pub fn contains(&self, segment: u32) -> bool {
        match self {
            SegmentFilter::All => true,
            SegmentFilter::Only(s) => *s == segment,
        }
    }
}

/// Selects file-catalog rows.
///
/// A row matches when its dataset type is in `dataset_types` (and its tag
/// equals `tag`, if given) or its host is in `host_tokens`, and it passes
/// the run and segment filters. The tag only constrains dataset-type
/// matches; raw DAQ files carry no tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    pub dataset_types: Vec<String>,
    pub host_tokens: Vec<String>,
    pub runs: RunFilter,
    pub segments: SegmentFilter,
    pub tag: Option<String>,
}

impl FileQuery {
    pub fn new(runs: RunFilter) -> Self {
        Self {
            dataset_types: Vec::new(),
            host_tokens: Vec::new(),
            runs,
            segments: SegmentFilter::All,
            tag: None,
        }
    }

    pub fn dataset_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dataset_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn host_tokens<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_tokens = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn segments(mut self, segments: SegmentFilter) -> Self {
        self.segments = segments;
        self
    }

    pub fn tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    /// True if the query cannot match anything.
    pub fn is_empty(&self) -> bool {
        self.dataset_types.is_empty() && self.host_tokens.is_empty()
    }

    /// In-process evaluation of the query against one row and its tag.
    pub fn matches(
        &self,
        record: &prodflow_protocol::CatalogFileRecord,
        record_tag: Option<&str>,
    ) -> bool {
        if !self.runs.contains(record.run) || !self.segments.contains(record.segment) {
            return false;
        }
        let by_host = record
            .detector_host
            .as_deref()
            .is_some_and(|host| self.host_tokens.iter().any(|h| h == host));
        let by_type = self.dataset_types.iter().any(|t| *t == record.dataset_type)
            && match &self.tag {
                Some(tag) => record_tag == Some(tag.as_str()),
                None => true,
            };
        by_host || by_type
    }
}

/// Selects production-status rows whose filename starts with a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusQuery {
    pub filename_prefix: String,
    pub runs: RunFilter,
}

/// Insert-or-replace of one production-status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub filename: String,
    pub dsttype: String,
    pub run: u32,
    pub segment: u32,
    pub state: ProductionState,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodflow_protocol::{CatalogFileRecord, FileStatus};

    fn record(dataset_type: &str, host: Option<&str>, run: u32, segment: u32) -> CatalogFileRecord {
        CatalogFileRecord {
            filename: format!("{dataset_type}-{run}-{segment}"),
            dataset_type: dataset_type.to_string(),
            run,
            segment,
            detector_host: host.map(str::to_string),
            status: FileStatus::Valid,
        }
    }

    #[test]
    fn range_is_inclusive() {
        let runs = RunFilter::Range { first: 10, last: 12 };
        assert!(runs.contains(10));
        assert!(runs.contains(12));
        assert!(!runs.contains(13));
    }

    #[test]
    fn query_matches_hosts_or_types() {
        let q = FileQuery::new(RunFilter::Single(5))
            .dataset_types(["DST_CALO"])
            .host_tokens(["gl1daq"]);
        assert!(q.matches(&record("DST_CALO", None, 5, 0), Some("t")));
        assert!(q.matches(&record("", Some("gl1daq"), 5, 3), None));
        assert!(!q.matches(&record("DST_JETS", None, 5, 0), None));
        assert!(!q.matches(&record("DST_CALO", None, 6, 0), None));
    }

    #[test]
    fn tag_only_constrains_dataset_types() {
        let q = FileQuery::new(RunFilter::All)
            .dataset_types(["DST_CALO"])
            .host_tokens(["gl1daq"])
            .tag(Some("ana472_2024p012_v001".into()));
        assert!(q.matches(&record("DST_CALO", None, 1, 0), Some("ana472_2024p012_v001")));
        assert!(!q.matches(&record("DST_CALO", None, 1, 0), Some("ana471_2024p011_v001")));
        assert!(q.matches(&record("", Some("gl1daq"), 1, 0), None));
    }

    #[test]
    fn segment_filter_restricts() {
        let q = FileQuery::new(RunFilter::All)
            .host_tokens(["intt0"])
            .segments(SegmentFilter::Only(0));
        assert!(q.matches(&record("", Some("intt0"), 1, 0), None));
        assert!(!q.matches(&record("", Some("intt0"), 1, 1), None));
    }
}
