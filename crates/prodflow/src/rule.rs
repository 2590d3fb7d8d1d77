//! Production rules.
//!
//! A [`RuleDescriptor`] is the validated, immutable description of one
//! production step. It is only constructed through [`RuleBuilder`], which
//! computes every derived field (build string, version string, output tag)
//! and rejects malformed input before any catalog is touched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ProdError, Result};
use crate::topology::Topology;
use prodflow_catalog::RunFilter;
use prodflow_protocol::defaults::{DEFAULT_DISK_REQUEST, DEFAULT_PHYSICS_MODE, DEFAULT_PRODMODE};
use prodflow_protocol::{rule_identity_key, rungroup, OutputStem, MAX_RUN};

// ============================================================================
// Run selection
// ============================================================================

/// Runs a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSelection {
    Single(u32),
    /// Inclusive on both ends.
    Range { first: u32, last: u32 },
    /// Sorted, without duplicates.
    List(Vec<u32>),
}

impl RunSelection {
    /// Interpret positional run numbers: one is a single run, two an
    /// inclusive range, three or more an explicit list.
    pub fn from_numbers(runs: &[u32]) -> Result<Self> {
        let selection = match runs {
            [] => return Err(ProdError::InvalidRunSelection("no runs given".into())),
            [run] => RunSelection::Single(*run),
            [first, last] => {
                if first > last {
                    return Err(ProdError::InvalidRunSelection(format!(
                        "range {first}-{last} is reversed"
                    )));
                }
                RunSelection::Range {
                    first: *first,
                    last: *last,
                }
            }
            many => Self::list(many.to_vec())?,
        };
        selection.check_bounds()?;
        Ok(selection)
    }

    /// Parse positional arguments as run numbers.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let runs = args
            .iter()
            .map(|arg| {
                let arg = arg.as_ref().trim();
                arg.parse::<u32>().map_err(|_| {
                    ProdError::InvalidRunSelection(format!("'{arg}' is not a run number"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_numbers(&runs)
    }

    /// Every integer in `text` is a run; always an explicit list, even for
    /// one or two entries.
    pub fn from_runlist_text(text: &str) -> Result<Self> {
        let number = Regex::new(r"[-+]?\d+").map_err(|e| ProdError::config(e.to_string()))?;

        let mut runs = Vec::new();
        for found in number.find_iter(text) {
            let token = found.as_str();
            let run = token.trim_start_matches('+').parse::<u32>().map_err(|_| {
                ProdError::InvalidRunSelection(format!("'{token}' in runlist is not a run number"))
            })?;
            runs.push(run);
        }
        let selection = Self::list(runs)?;
        selection.check_bounds()?;
        Ok(selection)
    }

    pub fn from_runlist_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProdError::io(path, e))?;
        Self::from_runlist_text(&text)
    }

    fn list(mut runs: Vec<u32>) -> Result<Self> {
        if runs.is_empty() {
            return Err(ProdError::InvalidRunSelection("run list is empty".into()));
        }
        runs.sort_unstable();
        runs.dedup();
        Ok(RunSelection::List(runs))
    }

    fn check_bounds(&self) -> Result<()> {
        let highest = match self {
            RunSelection::Single(run) => *run,
            RunSelection::Range { last, .. } => *last,
            RunSelection::List(runs) => runs.last().copied().unwrap_or(0),
        };
        if highest > MAX_RUN {
            return Err(ProdError::RunNumberOverflow(highest));
        }
        Ok(())
    }

    pub fn contains(&self, run: u32) -> bool {
        self.to_filter().contains(run)
    }

    pub fn to_filter(&self) -> RunFilter {
        match self {
            RunSelection::Single(run) => RunFilter::Single(*run),
            RunSelection::Range { first, last } => RunFilter::Range {
                first: *first,
                last: *last,
            },
            RunSelection::List(runs) => RunFilter::List(runs.clone()),
        }
    }
}

// ============================================================================
// Rule parts
// ============================================================================

/// Which upstream files feed the rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSelector {
    /// Tag derived inputs must carry (raw inputs have none).
    #[serde(default)]
    pub tag: Option<String>,
    /// Take upstream requirements from this type instead of the output type.
    #[serde(default)]
    pub dsttype: Option<String>,
}

/// Run-level cuts applied before any file lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQualityCuts {
    /// Run type must equal the rule's physics mode.
    #[serde(default)]
    pub require_run_type: bool,
    #[serde(default)]
    pub min_events: u64,
    #[serde(default)]
    pub min_duration_secs: u64,
}

impl RunQualityCuts {
    pub fn is_active(&self) -> bool {
        self.require_run_type || self.min_events > 0 || self.min_duration_secs > 0
    }
}

/// Payload and resource requests shared by every job of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub script: String,
    pub payload: String,
    /// Events per job handed to the payload (`0` = all).
    #[serde(default)]
    pub neventsper: u64,
    /// Extra files shipped with the job.
    #[serde(default)]
    pub rsync: String,
    pub mem: String,
    #[serde(default = "default_disk")]
    pub disk: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub batch_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_disk() -> String {
    DEFAULT_DISK_REQUEST.to_string()
}

/// Directory templates. Placeholders: `{prodmode} {period} {mode}
/// {lfnsnippet} {leafdir} {rungroup}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemTemplates {
    pub outdir: String,
    pub logdir: String,
    pub histdir: String,
    pub condor: String,
}

impl Default for FilesystemTemplates {
    fn default() -> Self {
        Self {
            outdir: "/sphenix/lustre01/sphnxpro/{prodmode}/{period}/{mode}/{lfnsnippet}/{leafdir}/{rungroup}/dst".into(),
            logdir: "/sphenix/data/data02/sphnxpro/{prodmode}/{period}/{mode}/{lfnsnippet}/{leafdir}/{rungroup}/log".into(),
            histdir: "/sphenix/data/data02/sphnxpro/{prodmode}/{period}/{mode}/{lfnsnippet}/{leafdir}/{rungroup}/hist".into(),
            condor: "/tmp/{prodmode}/{period}/{mode}/{lfnsnippet}/{leafdir}/{rungroup}/log".into(),
        }
    }
}

/// Directories of one job after template expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDirs {
    pub outdir: String,
    pub logdir: String,
    pub histdir: String,
    pub condor: String,
}

// ============================================================================
// Rule descriptor
// ============================================================================

/// Identity of a rule: two rules with the same identity produce the same
/// files, whatever else differs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleIdentity {
    pub dsttype: String,
    pub tag: String,
    pub build: String,
}

impl RuleIdentity {
    pub fn key(&self) -> String {
        rule_identity_key(&self.dsttype, &self.tag, &self.build)
    }
}

/// Validated production rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDescriptor {
    name: String,
    dsttype: String,
    period: String,
    outtag: String,
    build: String,
    build_string: String,
    dbtag: String,
    version: u32,
    version_string: String,
    outtriplet: String,
    version_token: Option<String>,
    input: InputSelector,
    runs: RunSelection,
    physics_mode: String,
    limit: usize,
    resubmit: bool,
    prodmode: String,
    mangle: Option<String>,
    quality: RunQualityCuts,
    nevents: u64,
    job: JobTemplate,
    filesystem: FilesystemTemplates,
}

impl RuleDescriptor {
    pub fn builder(dsttype: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(dsttype)
    }

    /// Name of the rule document entry (or the output type if unnamed).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dsttype(&self) -> &str {
        &self.dsttype
    }

    /// Dataset type whose topology entry supplies the inputs.
    pub fn input_dsttype(&self) -> &str {
        self.input.dsttype.as_deref().unwrap_or(&self.dsttype)
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    /// Dataset token in output names (`outstub`, defaulting to the period).
    pub fn outtag(&self) -> &str {
        &self.outtag
    }

    /// Build as written, e.g. `ana.472`.
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Build without dots, e.g. `ana472`.
    pub fn build_string(&self) -> &str {
        &self.build_string
    }

    pub fn dbtag(&self) -> &str {
        &self.dbtag
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    /// `<buildstring>_<dbtag>_<version>`; the tag of every output.
    pub fn outtriplet(&self) -> &str {
        &self.outtriplet
    }

    pub fn input(&self) -> &InputSelector {
        &self.input
    }

    pub fn runs(&self) -> &RunSelection {
        &self.runs
    }

    pub fn physics_mode(&self) -> &str {
        &self.physics_mode
    }

    /// Maximum number of jobs; 0 means no limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn resubmit(&self) -> bool {
        self.resubmit
    }

    pub fn prodmode(&self) -> &str {
        &self.prodmode
    }

    pub fn quality(&self) -> &RunQualityCuts {
        &self.quality
    }

    /// Events per job (`0` = all).
    pub fn nevents(&self) -> u64 {
        self.nevents
    }

    pub fn job(&self) -> &JobTemplate {
        &self.job
    }

    pub fn filesystem(&self) -> &FilesystemTemplates {
        &self.filesystem
    }

    pub fn identity(&self) -> RuleIdentity {
        RuleIdentity {
            dsttype: self.dsttype.clone(),
            tag: self.outtriplet.clone(),
            build: self.build.clone(),
        }
    }

    /// Naming stem of the rule's outputs (before per-leaf expansion).
    pub fn output_stem(&self) -> OutputStem {
        let dsttype = match &self.mangle {
            Some(replacement) => self.dsttype.replace("DST", replacement),
            None => self.dsttype.clone(),
        };
        let stem = OutputStem::new(dsttype, &self.outtag, &self.outtriplet);
        match &self.version_token {
            Some(token) => stem.with_version(token),
            None => stem,
        }
    }

    /// `<dsttype>_<outtag>_<tag>`: prefix of every submission file.
    pub fn submission_base(&self) -> String {
        format!("{}_{}_{}", self.dsttype, self.outtag, self.outtriplet)
    }

    /// Expand one directory template for a job.
    pub fn expand_dir(&self, template: &str, leafdir: &str, run: u32) -> String {
        template
            .replace("{prodmode}", &self.prodmode)
            .replace("{period}", &self.period)
            .replace("{mode}", &self.physics_mode)
            .replace("{lfnsnippet}", &self.outtriplet)
            .replace("{leafdir}", leafdir)
            .replace("{rungroup}", &rungroup(run))
    }

    pub fn job_dirs(&self, leafdir: &str, run: u32) -> JobDirs {
        JobDirs {
            outdir: self.expand_dir(&self.filesystem.outdir, leafdir, run),
            logdir: self.expand_dir(&self.filesystem.logdir, leafdir, run),
            histdir: self.expand_dir(&self.filesystem.histdir, leafdir, run),
            condor: self.expand_dir(&self.filesystem.condor, leafdir, run),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects rule fields; [`RuleBuilder::build`] validates and derives.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    name: Option<String>,
    dsttype: String,
    period: Option<String>,
    outtag: Option<String>,
    build: Option<String>,
    dbtag: Option<String>,
    version: u32,
    version_token: Option<String>,
    input: InputSelector,
    runs: Option<RunSelection>,
    physics_mode: String,
    limit: usize,
    resubmit: bool,
    prodmode: String,
    mangle: Option<String>,
    quality: RunQualityCuts,
    nevents: Option<u64>,
    job: Option<JobTemplate>,
    filesystem: FilesystemTemplates,
}

impl RuleBuilder {
    pub fn new(dsttype: impl Into<String>) -> Self {
        Self {
            name: None,
            dsttype: dsttype.into(),
            period: None,
            outtag: None,
            build: None,
            dbtag: None,
            version: 0,
            version_token: None,
            input: InputSelector::default(),
            runs: None,
            physics_mode: DEFAULT_PHYSICS_MODE.to_string(),
            limit: 0,
            resubmit: false,
            prodmode: DEFAULT_PRODMODE.to_string(),
            mangle: None,
            quality: RunQualityCuts::default(),
            nevents: None,
            job: None,
            filesystem: FilesystemTemplates::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Dataset token in output names; defaults to the period.
    pub fn outtag(mut self, outtag: impl Into<String>) -> Self {
        self.outtag = Some(outtag.into());
        self
    }

    pub fn build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    pub fn dbtag(mut self, dbtag: impl Into<String>) -> Self {
        self.dbtag = Some(dbtag.into());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn version_token(mut self, token: impl Into<String>) -> Self {
        self.version_token = Some(token.into());
        self
    }

    pub fn input(mut self, input: InputSelector) -> Self {
        self.input = input;
        self
    }

    pub fn runs(mut self, runs: RunSelection) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn physics_mode(mut self, mode: impl Into<String>) -> Self {
        self.physics_mode = mode.into();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn resubmit(mut self, resubmit: bool) -> Self {
        self.resubmit = resubmit;
        self
    }

    /// Replaces `{prodmode}` in directory templates.
    pub fn prodmode(mut self, prodmode: impl Into<String>) -> Self {
        self.prodmode = prodmode.into();
        self
    }

    /// Replace `DST` in output names, e.g. for test productions.
    pub fn mangle(mut self, replacement: impl Into<String>) -> Self {
        self.mangle = Some(replacement.into());
        self
    }

    pub fn quality(mut self, quality: RunQualityCuts) -> Self {
        self.quality = quality;
        self
    }

    /// Events per job; defaults to the job template's `neventsper`.
    pub fn nevents(mut self, nevents: u64) -> Self {
        self.nevents = Some(nevents);
        self
    }

    pub fn job(mut self, job: JobTemplate) -> Self {
        self.job = Some(job);
        self
    }

    pub fn filesystem(mut self, filesystem: FilesystemTemplates) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Validate against `topology` and compute derived fields.
    pub fn finish(self, topology: &Topology) -> Result<RuleDescriptor> {
        let dsttype = require_token("dsttype", Some(self.dsttype))?;
        topology.required_leaves(&dsttype)?;
        if let Some(input_type) = &self.input.dsttype {
            topology.required_leaves(input_type)?;
        }

        let runs = self
            .runs
            .ok_or_else(|| ProdError::InvalidRunSelection("no runs given".into()))?;

        let period = require_token("period", self.period)?;
        let outtag = match self.outtag {
            Some(outtag) => require_token("outtag", Some(outtag))?,
            None => period.clone(),
        };
        let build = require_token("build", self.build)?;
        let dbtag = require_token("dbtag", self.dbtag)?;
        let build_string = build.replace('.', "");
        let version_string = format!("v{:03}", self.version);
        let outtriplet = format!("{build_string}_{dbtag}_{version_string}");

        let job = self
            .job
            .ok_or_else(|| ProdError::invalid_rule(format!("{dsttype}: no job template")))?;
        if job.script.trim().is_empty() {
            return Err(ProdError::invalid_rule(format!("{dsttype}: job script is empty")));
        }
        let nevents = self.nevents.unwrap_or(job.neventsper);

        if let Some(token) = &self.version_token {
            require_token("version token", Some(token.clone()))?;
        }

        Ok(RuleDescriptor {
            name: self.name.unwrap_or_else(|| dsttype.clone()),
            dsttype,
            period,
            outtag,
            build,
            build_string,
            dbtag,
            version: self.version,
            version_string,
            outtriplet,
            version_token: self.version_token,
            input: self.input,
            runs,
            physics_mode: self.physics_mode,
            limit: self.limit,
            resubmit: self.resubmit,
            prodmode: self.prodmode,
            mangle: self.mangle,
            quality: self.quality,
            nevents,
            job,
            filesystem: self.filesystem,
        })
    }
}

/// Name components end up in filenames; `-` separates run and segment and
/// `/` separates directories, so neither may appear.
fn require_token(field: &str, value: Option<String>) -> Result<String> {
    let value = value.ok_or_else(|| ProdError::invalid_rule(format!("missing {field}")))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ProdError::invalid_rule(format!("{field} is empty")));
    }
    if value.contains(&['-', '/', ':'][..]) || value.chars().any(char::is_whitespace) {
        return Err(ProdError::invalid_rule(format!(
            "{field} '{value}' may not contain '-', '/', ':' or whitespace"
        )));
    }
    Ok(value)
}

// ============================================================================
// Rule documents
// ============================================================================

/// One rule as written in a YAML rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    pub params: ParamsDocument,
    #[serde(default)]
    pub input: InputDocument,
    pub job: JobTemplate,
    #[serde(default)]
    pub filesystem: Option<FilesystemTemplates>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsDocument {
    #[serde(alias = "rulestem")]
    pub dsttype: String,
    pub period: String,
    #[serde(default)]
    pub outstub: Option<String>,
    pub build: String,
    pub dbtag: String,
    pub version: u32,
    #[serde(default)]
    pub version_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDocument {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub dsttype: Option<String>,
    #[serde(default)]
    pub require_run_type: bool,
    #[serde(default)]
    pub min_events: u64,
    #[serde(default)]
    pub min_duration_secs: u64,
}

/// Values given on the command line; each one set replaces the document's.
#[derive(Debug, Clone, Default)]
pub struct RuleOverrides {
    pub runs: Option<RunSelection>,
    pub physics_mode: Option<String>,
    pub limit: Option<usize>,
    pub resubmit: bool,
    pub prodmode: Option<String>,
    pub mangle: Option<String>,
    pub nevents: Option<u64>,
}

impl RuleDocument {
    pub fn into_builder(self, name: &str) -> RuleBuilder {
        let mut builder = RuleBuilder::new(self.params.dsttype)
            .name(name)
            .period(self.params.period)
            .build(self.params.build)
            .dbtag(self.params.dbtag)
            .version(self.params.version)
            .input(InputSelector {
                tag: self.input.tag,
                dsttype: self.input.dsttype,
            })
            .quality(RunQualityCuts {
                require_run_type: self.input.require_run_type,
                min_events: self.input.min_events,
                min_duration_secs: self.input.min_duration_secs,
            })
            .job(self.job);
        if let Some(outstub) = self.params.outstub {
            builder = builder.outtag(outstub);
        }
        if let Some(token) = self.params.version_token {
            builder = builder.version_token(token);
        }
        if let Some(filesystem) = self.filesystem {
            builder = builder.filesystem(filesystem);
        }
        builder
    }
}

impl RuleOverrides {
    pub fn apply(self, mut builder: RuleBuilder) -> RuleBuilder {
        if let Some(runs) = self.runs {
            builder = builder.runs(runs);
        }
        if let Some(mode) = self.physics_mode {
            builder = builder.physics_mode(mode);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(prodmode) = self.prodmode {
            builder = builder.prodmode(prodmode);
        }
        if let Some(mangle) = self.mangle {
            builder = builder.mangle(mangle);
        }
        if let Some(nevents) = self.nevents {
            builder = builder.nevents(nevents);
        }
        builder.resubmit(self.resubmit)
    }
}

/// Parse every rule of a YAML rule file, keyed by rule name.
pub fn parse_rule_documents(text: &str) -> Result<BTreeMap<String, RuleDocument>> {
    serde_yaml::from_str(text).map_err(|e| ProdError::config(format!("rule file: {e}")))
}

/// Load rule `name` from `path`, fold in `overrides` and validate.
pub fn load_rule(
    path: &Path,
    name: &str,
    overrides: RuleOverrides,
    topology: &Topology,
) -> Result<RuleDescriptor> {
    let text = std::fs::read_to_string(path).map_err(|e| ProdError::io(path, e))?;
    let mut documents = parse_rule_documents(&text)?;
    let document = documents.remove(name).ok_or_else(|| {
        ProdError::config(format!(
            "rule '{}' not found in {} (available: {})",
            name,
            path.display(),
            documents.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })?;
    overrides.apply(document.into_builder(name)).finish(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobTemplate {
        JobTemplate {
            script: "run_calo.sh".into(),
            payload: "./payload".into(),
            neventsper: 0,
            rsync: String::new(),
            mem: "2000MB".into(),
            disk: default_disk(),
            priority: 0,
            batch_name: None,
            comment: None,
        }
    }

    fn calo() -> RuleBuilder {
        RuleDescriptor::builder("DST_CALO")
            .period("run2pp")
            .build("ana.472")
            .dbtag("2024p012")
            .version(1)
            .runs(RunSelection::Single(53877))
            .job(job())
    }

    #[test]
    fn single_number_is_a_single_run() {
        assert_eq!(
            RunSelection::parse_args(&["53877"]).unwrap(),
            RunSelection::Single(53877)
        );
    }

    #[test]
    fn two_numbers_are_an_inclusive_range() {
        let runs = RunSelection::from_numbers(&[100, 105]).unwrap();
        assert_eq!(runs, RunSelection::Range { first: 100, last: 105 });
        assert!(runs.contains(100));
        assert!(runs.contains(105));
        assert!(!runs.contains(106));
    }

    #[test]
    fn three_numbers_are_a_list() {
        let runs = RunSelection::from_numbers(&[7, 3, 7, 5]).unwrap();
        assert_eq!(runs, RunSelection::List(vec![3, 5, 7]));
        assert!(!runs.contains(4));
    }

    #[test]
    fn bad_selections_are_rejected() {
        assert!(matches!(
            RunSelection::from_numbers(&[]),
            Err(ProdError::InvalidRunSelection(_))
        ));
        assert!(matches!(
            RunSelection::from_numbers(&[10, 5]),
            Err(ProdError::InvalidRunSelection(_))
        ));
        assert!(matches!(
            RunSelection::parse_args(&["12a"]),
            Err(ProdError::InvalidRunSelection(_))
        ));
        assert!(matches!(
            RunSelection::from_numbers(&[100_000_000]),
            Err(ProdError::RunNumberOverflow(100_000_000))
        ));
    }

    #[test]
    fn runlist_is_always_a_list() {
        let runs = RunSelection::from_runlist_text("53877\n53880 # good\n").unwrap();
        assert_eq!(runs, RunSelection::List(vec![53877, 53880]));
        assert!(matches!(
            RunSelection::from_runlist_text("# nothing here\n"),
            Err(ProdError::InvalidRunSelection(_))
        ));
        assert!(matches!(
            RunSelection::from_runlist_text("-5\n"),
            Err(ProdError::InvalidRunSelection(_))
        ));
    }

    #[test]
    fn builder_derives_tags() {
        let rule = calo().finish(&Topology::builtin()).unwrap();
        assert_eq!(rule.build_string(), "ana472");
        assert_eq!(rule.version_string(), "v001");
        assert_eq!(rule.outtriplet(), "ana472_2024p012_v001");
        assert_eq!(rule.outtag(), "run2pp");
        assert_eq!(rule.job().disk, "10GB");
        assert_eq!(rule.prodmode(), "production");
        assert_eq!(
            rule.submission_base(),
            "DST_CALO_run2pp_ana472_2024p012_v001"
        );
    }

    #[test]
    fn unknown_output_type_fails_at_construction() {
        let err = RuleDescriptor::builder("DST_BOGUS")
            .period("run2pp")
            .build("ana.472")
            .dbtag("2024p012")
            .runs(RunSelection::Single(1))
            .job(job())
            .finish(&Topology::builtin())
            .unwrap_err();
        assert!(matches!(err, ProdError::UnknownDatasetType(_)));
    }

    #[test]
    fn missing_runs_fail_at_construction() {
        let err = RuleDescriptor::builder("DST_CALO")
            .period("run2pp")
            .build("ana.472")
            .dbtag("2024p012")
            .job(job())
            .finish(&Topology::builtin())
            .unwrap_err();
        assert!(matches!(err, ProdError::InvalidRunSelection(_)));
    }

    #[test]
    fn dashes_in_name_components_are_rejected() {
        let err = calo().dbtag("2024-p012").finish(&Topology::builtin()).unwrap_err();
        assert!(matches!(err, ProdError::InvalidRule(_)));
    }

    #[test]
    fn identity_ignores_operational_fields() {
        let topology = Topology::builtin();
        let a = calo().finish(&topology).unwrap();
        let b = calo().limit(5).resubmit(true).finish(&topology).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().key(), b.identity().key());
    }

    #[test]
    fn mangle_rewrites_output_names() {
        let rule = calo().mangle("TST").finish(&Topology::builtin()).unwrap();
        assert_eq!(
            rule.output_stem().filename(53877, 0).unwrap(),
            "TST_CALO_run2pp_ana472_2024p012_v001-00053877-00000.root"
        );
    }

    #[test]
    fn directories_expand_placeholders() {
        let rule = calo()
            .physics_mode("physics")
            .filesystem(FilesystemTemplates {
                outdir: "/data/{prodmode}/{period}/{mode}/{lfnsnippet}/{leafdir}/{rungroup}/dst".into(),
                logdir: "/log".into(),
                histdir: "/hist".into(),
                condor: "/condor".into(),
            })
            .finish(&Topology::builtin())
            .unwrap();
        let dirs = rule.job_dirs("DST_CALO", 53877);
        assert_eq!(
            dirs.outdir,
            "/data/production/run2pp/physics/ana472_2024p012_v001/DST_CALO/run_00053800_00053900/dst"
        );
        assert_eq!(dirs.logdir, "/log");
    }

    #[test]
    fn yaml_rule_loads_with_overrides() {
        let yaml = r#"
DST_CALO_run2pp:
  params:
    rulestem: DST_CALO
    period: run2pp
    outstub: ana
    build: ana.472
    dbtag: 2024p012
    version: 1
  input:
    tag: ana471_2024p011_v001
    min_events: 1000
  job:
    script: run_calo.sh
    payload: ./ProdFlow/run2pp/caloreco
    neventsper: 5000
    mem: 2048MB
    priority: 3800
"#;
        let mut docs = parse_rule_documents(yaml).unwrap();
        let doc = docs.remove("DST_CALO_run2pp").unwrap();
        let overrides = RuleOverrides {
            runs: Some(RunSelection::from_numbers(&[53000, 53100]).unwrap()),
            limit: Some(10),
            nevents: Some(100),
            ..Default::default()
        };
        let rule = overrides
            .apply(doc.into_builder("DST_CALO_run2pp"))
            .finish(&Topology::builtin())
            .unwrap();
        assert_eq!(rule.name(), "DST_CALO_run2pp");
        assert_eq!(rule.outtag(), "ana");
        assert_eq!(rule.outtriplet(), "ana472_2024p012_v001");
        assert_eq!(rule.input().tag.as_deref(), Some("ana471_2024p011_v001"));
        assert_eq!(rule.quality().min_events, 1000);
        assert!(rule.quality().is_active());
        assert_eq!(rule.limit(), 10);
        assert_eq!(rule.nevents(), 100);
        assert_eq!(rule.job().priority, 3800);
        assert_eq!(rule.job().disk, "10GB");
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        let yaml = r#"
R:
  params: { dsttype: DST_CALO, period: p, build: b, dbtag: d, version: 0, bogus: 1 }
  job: { script: s, payload: p, mem: m }
"#;
        assert!(matches!(parse_rule_documents(yaml), Err(ProdError::Config(_))));
    }
}
