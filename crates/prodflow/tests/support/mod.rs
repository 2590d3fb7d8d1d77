#![allow(dead_code)]

use chrono::Utc;
use prodflow::{JobTemplate, RuleBuilder, RuleDescriptor, RunSelection, Topology};
use prodflow_catalog::InMemoryCatalog;
use prodflow_protocol::{CatalogFileRecord, FileStatus, ProductionState, StatusRecord};

pub const TRIGGERED_HOSTS: [&str; 5] = ["emcal", "hcal", "ll1", "mbd", "zdc"];

pub fn job() -> JobTemplate {
    JobTemplate {
        script: "run_job0.sh".into(),
        payload: "./ProdFlow/run3auau".into(),
        neventsper: 0,
        rsync: "Fun4All.C,cups.py".into(),
        mem: "4000MB".into(),
        disk: "10GB".into(),
        priority: 3800,
        batch_name: Some("prod.triggered".into()),
        comment: None,
    }
}

pub fn builder(dsttype: &str, runs: RunSelection) -> RuleBuilder {
    RuleDescriptor::builder(dsttype)
        .period("run3auau")
        .build("new")
        .dbtag("nocdbtag")
        .version(0)
        .runs(runs)
        .job(job())
}

pub fn rule(dsttype: &str, runs: RunSelection) -> RuleDescriptor {
    builder(dsttype, runs)
        .finish(&Topology::builtin())
        .expect("valid rule")
}

pub fn raw(host: &str, run: u32, segment: u32, status: FileStatus) -> CatalogFileRecord {
    CatalogFileRecord {
        filename: format!("{host}_junk-{run:08}-{segment:04}.prdf"),
        dataset_type: String::new(),
        run,
        segment,
        detector_host: Some(host.to_string()),
        status,
    }
}

pub fn derived(dsttype: &str, run: u32, segment: u32) -> CatalogFileRecord {
    CatalogFileRecord {
        filename: format!("{dsttype}_run3auau_ana472_2024p012_v001-{run:08}-{segment:05}.root"),
        dataset_type: dsttype.to_string(),
        run,
        segment,
        detector_host: None,
        status: FileStatus::Valid,
    }
}

/// Every triggered-readout host plus the GL1 companion for one segment.
pub fn seed_triggered(catalog: &InMemoryCatalog, run: u32, segment: u32) {
    for host in TRIGGERED_HOSTS.iter().chain(["gl1daq"].iter()) {
        catalog.add_file(raw(host, run, segment, FileStatus::Valid), None);
    }
}

pub fn status(filename: &str, run: u32, segment: u32, state: ProductionState) -> StatusRecord {
    StatusRecord {
        filename: filename.to_string(),
        run,
        segment,
        state,
        submitted: Some(Utc::now()),
        ended: None,
    }
}
