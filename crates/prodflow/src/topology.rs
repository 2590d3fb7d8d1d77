//! Static dependency table between dataset types.
//!
//! Each output dataset type maps to an ordered set of upstream leaves. Raw
//! leaves are keyed by the DAQ host that writes them; derived leaves by the
//! dataset type that produces them. The table is validated once at load and
//! never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use crate::error::{ProdError, Result};
use prodflow_protocol::defaults::GL1_COMPANION;

/// How upstream leaves combine into outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    /// One output per unit; every leaf is required.
    AllOf,
    /// One output per leaf per unit, named `<dsttype>_<leaf>`.
    PerLeaf,
}

/// Where leaf tokens are looked up in the file catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Tokens are DAQ host names.
    Raw,
    /// Tokens are dataset types.
    Derived,
}

/// Granularity at which completeness is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// Every segment is its own unit.
    PerSegment,
    /// The whole run is one unit (segment 0); every file of a leaf must be
    /// valid.
    WholeRun,
    /// Only segment 0 is considered.
    FirstSegmentOnly,
}

impl SegmentPolicy {
    /// Input mode token handed to the payload script.
    pub fn input_mode(&self) -> &'static str {
        match self {
            SegmentPolicy::PerSegment => "dbinput",
            SegmentPolicy::WholeRun => "allsegsfromdb",
            SegmentPolicy::FirstSegmentOnly => "seg0fromdb",
        }
    }
}

/// One upstream requirement: a stable leaf name and the catalog token
/// (host or dataset type) it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub name: String,
    pub token: String,
}

impl Leaf {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    /// A derived leaf whose name and token are both the dataset type.
    pub fn derived(dsttype: impl Into<String>) -> Self {
        let dsttype = dsttype.into();
        Self {
            name: dsttype.clone(),
            token: dsttype,
        }
    }
}

/// Leaves for a partitioned detector readout.
///
/// `partition_leaves("TPC", "ebdc", 3, 2)` yields
/// `TPC00→ebdc00, TPC01→ebdc01, TPC02→ebdc02`.
pub fn partition_leaves(leaf_prefix: &str, host_prefix: &str, count: u32, width: usize) -> Vec<Leaf> {
    (0..count)
        .map(|i| {
            Leaf::new(
                format!("{leaf_prefix}{i:0width$}"),
                format!("{host_prefix}{i:0width$}"),
            )
        })
        .collect()
}

/// Requirements of one output dataset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub dsttype: String,
    pub leaves: Vec<Leaf>,
    pub fan: FanMode,
    pub source: SourceKind,
    /// Tokens every leaf additionally requires; their files come first in
    /// each input list.
    pub companions: Vec<String>,
    pub segments: SegmentPolicy,
}

impl TopologyEntry {
    pub fn leaf_tokens(&self) -> impl Iterator<Item = &str> {
        self.leaves.iter().map(|leaf| leaf.token.as_str())
    }

    /// Leaf tokens followed by companion tokens.
    pub fn all_tokens(&self) -> Vec<String> {
        self.leaves
            .iter()
            .map(|leaf| leaf.token.clone())
            .chain(self.companions.iter().cloned())
            .collect()
    }

    /// Dataset types this entry writes.
    pub fn produced_types(&self) -> Vec<String> {
        match self.fan {
            FanMode::AllOf => vec![self.dsttype.clone()],
            FanMode::PerLeaf => self
                .leaves
                .iter()
                .map(|leaf| format!("{}_{}", self.dsttype, leaf.name))
                .collect(),
        }
    }

    /// Output dataset type for one leaf (`None` for many-to-one entries).
    pub fn output_dsttype(&self, leaf: Option<&Leaf>) -> String {
        match (self.fan, leaf) {
            (FanMode::PerLeaf, Some(leaf)) => format!("{}_{}", self.dsttype, leaf.name),
            _ => self.dsttype.clone(),
        }
    }
}

/// The full dependency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    entries: BTreeMap<String, TopologyEntry>,
}

impl Topology {
    /// Build and validate a topology from entries.
    pub fn new(entries: impl IntoIterator<Item = TopologyEntry>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.leaves.is_empty() {
                return Err(ProdError::config(format!(
                    "{} declares no upstream leaves",
                    entry.dsttype
                )));
            }
            if let Some(previous) = map.insert(entry.dsttype.clone(), entry) {
                return Err(ProdError::config(format!(
                    "{} is declared twice",
                    previous.dsttype
                )));
            }
        }
        let topology = Self { entries: map };
        topology.validate()?;
        Ok(topology)
    }

    /// The production dependency table.
    pub fn builtin() -> Self {
        let mut streaming = Vec::new();
        streaming.extend(partition_leaves("INTT", "intt", 8, 1));
        streaming.extend(partition_leaves("MVTX", "mvtx", 6, 1));
        streaming.extend(partition_leaves("TPC", "ebdc", 24, 2));
        streaming.push(Leaf::new("TPOT", "ebdc39"));

        let tracking_inputs: Vec<Leaf> = streaming
            .iter()
            .map(|leaf| Leaf::derived(format!("DST_STREAMING_EVENT_{}", leaf.name)))
            .collect();

        let derived = |dsttype: &str, leaves: Vec<Leaf>| TopologyEntry {
            dsttype: dsttype.to_string(),
            leaves,
            fan: FanMode::AllOf,
            source: SourceKind::Derived,
            companions: Vec::new(),
            segments: SegmentPolicy::PerSegment,
        };

        let entries = vec![
            TopologyEntry {
                dsttype: "DST_STREAMING_EVENT".to_string(),
                leaves: streaming,
                fan: FanMode::PerLeaf,
                source: SourceKind::Raw,
                companions: vec![GL1_COMPANION.to_string()],
                segments: SegmentPolicy::WholeRun,
            },
            derived("DST_TRKR_CLUSTER", tracking_inputs.clone()),
            derived("DST_TRKR_SEED", tracking_inputs),
            derived(
                "DST_TRKR_TRACKS",
                vec![
                    Leaf::derived("DST_TRKR_CLUSTER"),
                    Leaf::derived("DST_TRKR_SEED"),
                ],
            ),
            TopologyEntry {
                dsttype: "DST_TRIGGERED_EVENT".to_string(),
                leaves: ["emcal", "hcal", "ll1", "mbd", "zdc"]
                    .into_iter()
                    .map(|host| Leaf::new(host, host))
                    .collect(),
                fan: FanMode::AllOf,
                source: SourceKind::Raw,
                companions: vec![GL1_COMPANION.to_string()],
                segments: SegmentPolicy::PerSegment,
            },
            derived("DST_CALOFITTING", vec![Leaf::derived("DST_TRIGGERED_EVENT")]),
            derived("DST_CALO", vec![Leaf::derived("DST_CALOFITTING")]),
            derived("DST_JETS", vec![Leaf::derived("DST_CALO")]),
            derived("DST_JETCALO", vec![Leaf::derived("DST_CALOFITTING")]),
        ];

        let entries = entries
            .into_iter()
            .map(|entry| (entry.dsttype.clone(), entry))
            .collect();
        Self { entries }
    }

    /// Load from a YAML or TOML document (chosen by file extension).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProdError::io(path, e))?;
        let document: TopologyDocument = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| ProdError::config(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&text)
                .map_err(|e| ProdError::config(format!("{}: {}", path.display(), e)))?,
        };
        Self::from_document(document)
    }

    pub fn from_document(document: TopologyDocument) -> Result<Self> {
        Self::new(
            document
                .outputs
                .into_iter()
                .map(|(dsttype, doc)| doc.into_entry(dsttype)),
        )
    }

    /// Requirements of `dsttype`.
    pub fn required_leaves(&self, dsttype: &str) -> Result<&TopologyEntry> {
        self.entries
            .get(dsttype)
            .ok_or_else(|| ProdError::UnknownDatasetType(dsttype.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &TopologyEntry> {
        self.entries.values()
    }

    pub fn contains(&self, dsttype: &str) -> bool {
        self.entries.contains_key(dsttype)
    }

    /// Map every produced dataset type to the entry that writes it.
    fn producers(&self) -> HashMap<String, &str> {
        self.entries
            .values()
            .flat_map(|entry| {
                entry
                    .produced_types()
                    .into_iter()
                    .map(move |produced| (produced, entry.dsttype.as_str()))
            })
            .collect()
    }

    /// Derived leaves must name a produced type, and the graph must be
    /// acyclic.
    fn validate(&self) -> Result<()> {
        let producers = self.producers();

        // entry -> entries it reads from
        let mut upstream: HashMap<&str, Vec<&str>> = HashMap::new();
        for entry in self.entries.values() {
            let mut deps = Vec::new();
            if entry.source == SourceKind::Derived {
                for token in entry.leaf_tokens() {
                    let producer = producers
                        .get(token)
                        .copied()
                        .ok_or_else(|| ProdError::UnknownDatasetType(token.to_string()))?;
                    if !deps.contains(&producer) {
                        deps.push(producer);
                    }
                }
            }
            upstream.insert(entry.dsttype.as_str(), deps);
        }

        // Kahn: repeatedly retire entries whose upstreams are all retired.
        let mut pending: HashMap<&str, usize> =
            upstream.iter().map(|(k, deps)| (*k, deps.len())).collect();
        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
        for (entry, deps) in &upstream {
            for dep in deps {
                downstream.entry(*dep).or_default().push(*entry);
            }
        }
        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut retired = 0usize;
        while let Some(entry) = ready.pop_front() {
            retired += 1;
            for &child in downstream.get(entry).into_iter().flatten() {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if retired < upstream.len() {
            let mut stuck: Vec<&str> = pending
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(k, _)| *k)
                .collect();
            stuck.sort_unstable();
            return Err(ProdError::CyclicTopology(stuck.join(", ")));
        }
        Ok(())
    }
}

/// Serialized form of a topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDocument {
    pub outputs: BTreeMap<String, EntryDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDocument {
    pub leaf_prefix: String,
    pub host_prefix: String,
    pub count: u32,
    #[serde(default = "default_width")]
    pub width: usize,
}

fn default_width() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDocument {
    pub source: SourceKind,
    #[serde(default = "default_fan")]
    pub fan: FanMode,
    #[serde(default = "default_segments")]
    pub segments: SegmentPolicy,
    #[serde(default)]
    pub companions: Vec<String>,
    /// Expanded first, in order.
    #[serde(default)]
    pub partitions: Vec<PartitionDocument>,
    /// Plain leaves; a bare string is a leaf whose name equals its token.
    #[serde(default)]
    pub leaves: Vec<LeafDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeafDocument {
    Token(String),
    Named { name: String, token: String },
}

fn default_fan() -> FanMode {
    FanMode::AllOf
}

fn default_segments() -> SegmentPolicy {
    SegmentPolicy::PerSegment
}

impl EntryDocument {
    fn into_entry(self, dsttype: String) -> TopologyEntry {
        let mut leaves = Vec::new();
        for p in &self.partitions {
            leaves.extend(partition_leaves(&p.leaf_prefix, &p.host_prefix, p.count, p.width));
        }
        leaves.extend(self.leaves.into_iter().map(|leaf| match leaf {
            LeafDocument::Token(token) => Leaf::new(token.clone(), token),
            LeafDocument::Named { name, token } => Leaf::new(name, token),
        }));
        TopologyEntry {
            dsttype,
            leaves,
            fan: self.fan,
            source: self.source,
            companions: self.companions,
            segments: self.segments,
        }
    }
}
