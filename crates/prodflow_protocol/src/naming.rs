//! Output filename contract.
//!
//! Every produced file is named
//! `<dsttype>_<outtag>_<tag>-<run:08>-<segment:05>.root`, optionally with one
//! extra version token before the run number. Downstream tooling parses
//! these names, so the widths are fixed: a run that does not fit in eight
//! digits is an error, never a wider or truncated name.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Zero-padded width of run numbers in filenames.
pub const RUN_WIDTH: usize = 8;
/// Zero-padded width of segment numbers in filenames.
pub const SEGMENT_WIDTH: usize = 5;
/// Largest run number that fits the filename contract.
pub const MAX_RUN: u32 = 99_999_999;
/// Largest segment number that fits the filename contract.
pub const MAX_SEGMENT: u32 = 99_999;
/// Extension of every produced data file.
pub const OUTPUT_EXTENSION: &str = "root";

/// Errors raised while formatting or parsing output names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("Run number {run} does not fit in 8 digits")]
    RunNumberOverflow { run: u32 },

    #[error("Segment number {segment} does not fit in 5 digits")]
    SegmentOverflow { segment: u32 },

    #[error("Cannot parse output filename '{name}': {reason}")]
    Unparseable { name: String, reason: String },
}

/// The run/segment independent part of an output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputStem {
    dsttype: String,
    outtag: String,
    tag: String,
    version: Option<String>,
}

impl OutputStem {
    pub fn new(dsttype: impl Into<String>, outtag: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            dsttype: dsttype.into(),
            outtag: outtag.into(),
            tag: tag.into(),
            version: None,
        }
    }

    /// Insert an extra version/build token before the run number.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Stem for one leaf of a fanned-out output (`<dsttype>_<leaf>`).
    pub fn for_leaf(&self, leaf: &str) -> Self {
        Self {
            dsttype: format!("{}_{}", self.dsttype, leaf),
            ..self.clone()
        }
    }

    pub fn dsttype(&self) -> &str {
        &self.dsttype
    }

    /// True for this stem's dataset type and its per-leaf types.
    pub fn covers(&self, dsttype: &str) -> bool {
        dsttype
            .strip_prefix(self.dsttype.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
    }

    /// True when `parsed` was named from this stem or one of its leaves.
    pub fn owns(&self, parsed: &ParsedOutput) -> bool {
        self.covers(&parsed.dsttype) && parsed.version.as_deref() == self.version()
    }

    pub fn outtag(&self) -> &str {
        &self.outtag
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// `<dsttype>_<outtag>_<tag>[_<version>]`
    pub fn outbase(&self) -> String {
        match &self.version {
            Some(v) => format!("{}_{}_{}_{}", self.dsttype, self.outtag, self.tag, v),
            None => format!("{}_{}_{}", self.dsttype, self.outtag, self.tag),
        }
    }

    /// Output name without extension; also used to name log files.
    pub fn logbase(&self, run: u32, segment: u32) -> Result<String, NamingError> {
        Ok(format!(
            "{}-{}-{}",
            self.outbase(),
            format_run(run)?,
            format_segment(segment)?
        ))
    }

    pub fn filename(&self, run: u32, segment: u32) -> Result<String, NamingError> {
        Ok(format!("{}.{}", self.logbase(run, segment)?, OUTPUT_EXTENSION))
    }
}

/// Zero-pad a run number to [`RUN_WIDTH`] digits.
pub fn format_run(run: u32) -> Result<String, NamingError> {
    if run > MAX_RUN {
        return Err(NamingError::RunNumberOverflow { run });
    }
    Ok(format!("{:0width$}", run, width = RUN_WIDTH))
}

/// Zero-pad a segment number to [`SEGMENT_WIDTH`] digits.
pub fn format_segment(segment: u32) -> Result<String, NamingError> {
    if segment > MAX_SEGMENT {
        return Err(NamingError::SegmentOverflow { segment });
    }
    Ok(format!("{:0width$}", segment, width = SEGMENT_WIDTH))
}

/// Directory bucket for a run: `run_<a:08>_<b:08>` with `a` the run rounded
/// down to a multiple of 100 and `b = a + 100`.
pub fn rungroup(run: u32) -> String {
    let low = u64::from(run) / 100 * 100;
    let high = low + 100;
    format!("run_{:08}_{:08}", low, high)
}

/// Components recovered from a produced filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub dsttype: String,
    pub version: Option<String>,
    pub run: u32,
    pub segment: u32,
    pub extension: String,
}

/// Parse a produced filename back into its components.
///
/// Accepts bare names, full paths, and spider lines of the form
/// `<path>:<nevents>:...` (everything after the first colon is ignored).
pub fn parse_output_filename(
    name: &str,
    outtag: &str,
    tag: &str,
) -> Result<ParsedOutput, NamingError> {
    let unparseable = |reason: &str| NamingError::Unparseable {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let head = name.split(':').next().unwrap_or_default();
    let base = head.rsplit('/').next().unwrap_or_default();

    let marker = format!("_{}_{}", outtag, tag);
    let (dsttype, rest) = base
        .split_once(marker.as_str())
        .ok_or_else(|| unparseable("missing outtag/tag marker"))?;
    if dsttype.is_empty() {
        return Err(unparseable("empty dataset type"));
    }

    let (version, rest) = match rest.strip_prefix('_') {
        Some(versioned) => {
            let (token, tail) = versioned
                .split_once('-')
                .ok_or_else(|| unparseable("missing run number"))?;
            (Some(token.to_string()), tail)
        }
        None => (
            None,
            rest.strip_prefix('-')
                .ok_or_else(|| unparseable("missing run number"))?,
        ),
    };

    let (run_str, seg_ext) = rest
        .split_once('-')
        .ok_or_else(|| unparseable("missing segment number"))?;
    let (seg_str, extension) = seg_ext
        .split_once('.')
        .ok_or_else(|| unparseable("missing extension"))?;

    let run = run_str
        .parse::<u32>()
        .map_err(|_| unparseable("run is not a number"))?;
    let segment = seg_str
        .parse::<u32>()
        .map_err(|_| unparseable("segment is not a number"))?;

    Ok(ParsedOutput {
        dsttype: dsttype.to_string(),
        version,
        run,
        segment,
        extension: extension.to_string(),
    })
}
