//! Turns match results into job descriptors.
//!
//! Assembly is pure: names, argument vectors, directories and resource
//! requests are computed from the rule and the match result only. The
//! scheduler slot stays unset until a scheduler assigns one.

use serde::Serialize;
use tracing::trace;

use crate::error::Result;
use crate::matcher::MatchResult;
use crate::rule::{JobDirs, RuleDescriptor};

/// Resources requested from the batch system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub mem: String,
    pub disk: String,
    pub cpus: u32,
    pub priority: i32,
}

/// Cluster/process pair assigned by the scheduler after submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSlot {
    pub cluster: Option<u64>,
    pub process: Option<u64>,
}

/// Everything needed to run one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    /// Position in assembly order, starting at 0.
    pub sequence: u64,
    pub slot: SchedulerSlot,
    pub run: u32,
    pub segment: u32,
    pub dsttype: String,
    pub output: String,
    pub outbase: String,
    pub logbase: String,
    /// Positional arguments of the job script.
    pub arguments: Vec<String>,
    pub inputs: Vec<String>,
    pub resources: ResourceRequest,
    pub dirs: JobDirs,
    pub script: String,
    pub payload: String,
    pub rsync: String,
    pub batch_name: Option<String>,
}

/// Index of the first input filename in [`JobDescriptor::arguments`].
pub const FIRST_INPUT_ARG: usize = 11;

/// Assigns monotonically increasing sequence numbers while assembling.
#[derive(Debug, Default)]
pub struct JobAssembler {
    next: u64,
}

impl JobAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble(&mut self, rule: &RuleDescriptor, result: &MatchResult) -> Result<JobDescriptor> {
        let outbase = result.stem.outbase();
        let logbase = result.stem.logbase(result.run, result.segment)?;
        let dirs = rule.job_dirs(&result.output_dsttype, result.run);

        let mut arguments = Vec::with_capacity(FIRST_INPUT_ARG + result.inputs.len());
        arguments.push(rule.nevents().to_string());
        arguments.push(outbase.clone());
        arguments.push(logbase.clone());
        arguments.push(result.run.to_string());
        arguments.push(result.segment.to_string());
        arguments.push(dirs.outdir.clone());
        arguments.push(dirs.histdir.clone());
        arguments.push(rule.build().to_string());
        arguments.push(rule.dbtag().to_string());
        arguments.push(result.output_dsttype.clone());
        arguments.push(result.policy.input_mode().to_string());
        arguments.extend(result.inputs.iter().cloned());

        let job = rule.job();
        let descriptor = JobDescriptor {
            sequence: self.next,
            slot: SchedulerSlot::default(),
            run: result.run,
            segment: result.segment,
            dsttype: result.output_dsttype.clone(),
            output: result.output.clone(),
            outbase,
            logbase,
            arguments,
            inputs: result.inputs.clone(),
            resources: ResourceRequest {
                mem: job.mem.clone(),
                disk: job.disk.clone(),
                cpus: 1,
                priority: job.priority,
            },
            dirs,
            script: job.script.clone(),
            payload: job.payload.clone(),
            rsync: job.rsync.clone(),
            batch_name: job.batch_name.clone(),
        };
        self.next += 1;
        trace!(sequence = descriptor.sequence, output = %descriptor.output, "Assembled job");
        Ok(descriptor)
    }

    pub fn assemble_all(
        &mut self,
        rule: &RuleDescriptor,
        results: &[MatchResult],
    ) -> Result<Vec<JobDescriptor>> {
        results.iter().map(|r| self.assemble(rule, r)).collect()
    }
}
