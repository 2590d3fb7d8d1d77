mod support;

use prodflow::{
    resolve, Catalogs, ExclusionReason, ProdError, RunQualityCuts, RunSelection, SegmentPolicy,
    Topology,
};
use prodflow_catalog::{InMemoryCatalog, SqliteCatalog};
use prodflow_protocol::{FileStatus, ProductionState, RunInfo};
use std::time::Duration;
use support::{derived, raw, rule, seed_triggered, status, TRIGGERED_HOSTS};

fn catalogs(catalog: &InMemoryCatalog) -> Catalogs<'_> {
    Catalogs::new(catalog, catalog).with_runs(catalog)
}

#[tokio::test]
async fn complete_segments_match_in_run_segment_order() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 101, 0);
    seed_triggered(&catalog, 100, 1);
    seed_triggered(&catalog, 100, 0);
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Range { first: 100, last: 101 });
    let topology = Topology::builtin();

    let resolution = resolve(&rule, &topology, &catalogs(&catalog)).await.unwrap();
    let units: Vec<(u32, u32)> = resolution.results.iter().map(|r| (r.run, r.segment)).collect();
    assert_eq!(units, vec![(100, 0), (100, 1), (101, 0)]);
    assert_eq!(
        resolution.results[0].output,
        "DST_TRIGGERED_EVENT_run3auau_new_nocdbtag_v000-00000100-00000.root"
    );
    assert_eq!(resolution.summary.candidates, 3);
    assert_eq!(resolution.summary.matched, 3);
    assert!(resolution.summary.is_complete());

    // GL1 files first, then the leaves in topology order.
    let inputs = &resolution.results[0].inputs;
    assert_eq!(inputs.len(), 6);
    assert!(inputs[0].starts_with("gl1daq"));
    assert!(inputs[1].starts_with("emcal"));
    assert!(inputs[5].starts_with("zdc"));

    let again = resolve(&rule, &topology, &catalogs(&catalog)).await.unwrap();
    assert_eq!(again, resolution);
}

#[tokio::test]
async fn missing_leaf_makes_segment_incomplete() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 100, 0);
    for host in TRIGGERED_HOSTS.iter().filter(|h| **h != "mbd") {
        catalog.add_file(raw(host, 100, 1, FileStatus::Valid), None);
    }
    catalog.add_file(raw("gl1daq", 100, 1, FileStatus::Valid), None);
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].segment, 0);
    assert_eq!(resolution.summary.excluded(ExclusionReason::IncompleteInputs), 1);
}

#[tokio::test]
async fn invalid_file_does_not_satisfy_leaf() {
    let catalog = InMemoryCatalog::new();
    for host in TRIGGERED_HOSTS.iter().chain(["gl1daq"].iter()) {
        let status = if *host == "zdc" {
            FileStatus::Invalid
        } else {
            FileStatus::Valid
        };
        catalog.add_file(raw(host, 100, 0, status), None);
    }
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert!(resolution.results.is_empty());
    assert_eq!(resolution.summary.excluded(ExclusionReason::IncompleteInputs), 1);
}

#[tokio::test]
async fn companion_is_required() {
    let catalog = InMemoryCatalog::new();
    for host in TRIGGERED_HOSTS {
        catalog.add_file(raw(host, 100, 0, FileStatus::Valid), None);
    }
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert!(resolution.results.is_empty());
    assert_eq!(resolution.summary.candidates, 1);
    assert_eq!(resolution.summary.excluded(ExclusionReason::IncompleteInputs), 1);
}

#[tokio::test]
async fn recorded_status_blocks_or_allows_resubmission() {
    let catalog = InMemoryCatalog::new();
    for segment in 0..4 {
        seed_triggered(&catalog, 100, segment);
    }
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));
    let stem = rule.output_stem();
    let name = |segment| stem.filename(100, segment).unwrap();
    catalog.add_status("DST_TRIGGERED_EVENT", status(&name(0), 100, 0, ProductionState::Finished));
    catalog.add_status("DST_TRIGGERED_EVENT", status(&name(1), 100, 1, ProductionState::Running));
    catalog.add_status("DST_TRIGGERED_EVENT", status(&name(2), 100, 2, ProductionState::Failed));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    let segments: Vec<u32> = resolution.results.iter().map(|r| r.segment).collect();
    assert_eq!(segments, vec![2, 3]);
    assert_eq!(resolution.summary.excluded(ExclusionReason::DuplicateOutput), 1);
    assert_eq!(resolution.summary.excluded(ExclusionReason::InProgress), 1);

    let forced = support::builder("DST_TRIGGERED_EVENT", RunSelection::Single(100))
        .resubmit(true)
        .finish(&Topology::builtin())
        .unwrap();
    let resolution = resolve(&forced, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 4);
}

#[tokio::test]
async fn output_in_file_catalog_is_a_duplicate() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 100, 0);
    seed_triggered(&catalog, 100, 1);
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));
    let mut produced = derived("DST_TRIGGERED_EVENT", 100, 0);
    produced.filename = rule.output_stem().filename(100, 0).unwrap();
    catalog.add_file(produced, Some(rule.outtriplet()));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].segment, 1);
    assert_eq!(resolution.summary.excluded(ExclusionReason::DuplicateOutput), 1);
}

#[tokio::test]
async fn limit_keeps_the_lowest_units() {
    let catalog = InMemoryCatalog::new();
    for segment in 0..5 {
        seed_triggered(&catalog, 100, segment);
    }
    let rule = support::builder("DST_TRIGGERED_EVENT", RunSelection::Single(100))
        .limit(2)
        .finish(&Topology::builtin())
        .unwrap();

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    let segments: Vec<u32> = resolution.results.iter().map(|r| r.segment).collect();
    assert_eq!(segments, vec![0, 1]);
    assert_eq!(resolution.summary.excluded(ExclusionReason::LimitReached), 3);
    assert_eq!(resolution.summary.matched, 2);
}

#[tokio::test]
async fn streaming_fans_out_per_leaf_over_whole_runs() {
    let catalog = InMemoryCatalog::new();
    for segment in 0..3 {
        catalog.add_file(raw("intt3", 200, segment, FileStatus::Valid), None);
        catalog.add_file(raw("ebdc07", 200, segment, FileStatus::Valid), None);
        catalog.add_file(raw("gl1daq", 200, segment, FileStatus::Valid), None);
    }
    catalog.add_file(raw("mvtx2", 200, 0, FileStatus::Valid), None);
    catalog.add_file(raw("mvtx2", 200, 1, FileStatus::Unknown), None);
    let rule = rule("DST_STREAMING_EVENT", RunSelection::Single(200));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    let outputs: Vec<&str> = resolution.results.iter().map(|r| r.output.as_str()).collect();
    assert_eq!(
        outputs,
        vec![
            "DST_STREAMING_EVENT_INTT3_run3auau_new_nocdbtag_v000-00000200-00000.root",
            "DST_STREAMING_EVENT_TPC07_run3auau_new_nocdbtag_v000-00000200-00000.root",
        ]
    );
    assert_eq!(resolution.results[0].host.as_deref(), Some("intt3"));
    assert_eq!(resolution.results[0].inputs.len(), 6);
    assert_eq!(resolution.results[0].output_dsttype, "DST_STREAMING_EVENT_INTT3");
    // mvtx2 has a file that is not known to be good.
    assert_eq!(resolution.summary.candidates, 3);
    assert_eq!(resolution.summary.excluded(ExclusionReason::IncompleteInputs), 1);
}

#[tokio::test]
async fn streaming_can_combine_segment_zero_only() {
    let catalog = InMemoryCatalog::new();
    for segment in 0..3 {
        catalog.add_file(raw("intt3", 200, segment, FileStatus::Valid), None);
        catalog.add_file(raw("gl1daq", 200, segment, FileStatus::Valid), None);
    }
    catalog.add_file(raw("mvtx2", 200, 1, FileStatus::Valid), None);
    let builtin = Topology::builtin();
    let entries = builtin.entries().cloned().map(|mut entry| {
        if entry.dsttype == "DST_STREAMING_EVENT" {
            entry.segments = SegmentPolicy::FirstSegmentOnly;
        }
        entry
    });
    let topology = Topology::new(entries).unwrap();
    let rule = support::builder("DST_STREAMING_EVENT", RunSelection::Single(200))
        .finish(&topology)
        .unwrap();

    let resolution = resolve(&rule, &topology, &catalogs(&catalog)).await.unwrap();
    assert_eq!(resolution.results.len(), 1);
    let result = &resolution.results[0];
    assert_eq!(
        result.output,
        "DST_STREAMING_EVENT_INTT3_run3auau_new_nocdbtag_v000-00000200-00000.root"
    );
    assert_eq!(
        result.inputs,
        vec![
            "gl1daq_junk-00000200-0000.prdf",
            "intt3_junk-00000200-0000.prdf",
        ]
    );
}

#[tokio::test]
async fn derived_inputs_must_carry_the_input_tag() {
    let catalog = InMemoryCatalog::new();
    catalog.add_file(derived("DST_CALOFITTING", 300, 0), Some("ana472_2024p012_v001"));
    let mut other = derived("DST_CALOFITTING", 300, 1);
    other.filename = other.filename.replace("v001", "v002");
    catalog.add_file(other, Some("ana472_2024p012_v002"));

    let rule = support::builder("DST_CALO", RunSelection::Single(300))
        .input(prodflow::InputSelector {
            tag: Some("ana472_2024p012_v001".into()),
            dsttype: None,
        })
        .finish(&Topology::builtin())
        .unwrap();
    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].segment, 0);
    assert_eq!(
        resolution.results[0].inputs,
        vec!["DST_CALOFITTING_run3auau_ana472_2024p012_v001-00000300-00000.root"]
    );
}

#[tokio::test]
async fn tracks_need_every_upstream_type_in_the_segment() {
    let catalog = InMemoryCatalog::new();
    let tag = Some("ana472_2024p012_v001");
    catalog.add_file(derived("DST_TRKR_CLUSTER", 400, 0), tag);
    catalog.add_file(derived("DST_TRKR_SEED", 400, 0), tag);
    catalog.add_file(derived("DST_TRKR_CLUSTER", 400, 1), tag);

    let rule = support::builder("DST_TRKR_TRACKS", RunSelection::Single(400))
        .input(prodflow::InputSelector {
            tag: tag.map(str::to_string),
            dsttype: None,
        })
        .finish(&Topology::builtin())
        .unwrap();
    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].segment, 0);
    assert_eq!(
        resolution.results[0].output,
        "DST_TRKR_TRACKS_run3auau_new_nocdbtag_v000-00000400-00000.root"
    );
    let mut inputs = resolution.results[0].inputs.clone();
    inputs.sort();
    assert_eq!(
        inputs,
        vec![
            "DST_TRKR_CLUSTER_run3auau_ana472_2024p012_v001-00000400-00000.root",
            "DST_TRKR_SEED_run3auau_ana472_2024p012_v001-00000400-00000.root",
        ]
    );
    assert_eq!(resolution.summary.excluded(ExclusionReason::IncompleteInputs), 1);
}

#[tokio::test]
async fn failing_run_is_recorded_and_others_resolve() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 100, 0);
    seed_triggered(&catalog, 101, 0);
    catalog.fail_run(101);
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Range { first: 100, last: 101 });

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.results[0].run, 100);
    assert!(!resolution.summary.is_complete());
    assert_eq!(resolution.summary.failures[0].run, 101);
    assert!(!resolution.summary.failures[0].timed_out);
    assert_eq!(resolution.summary.excluded(ExclusionReason::CatalogQueryFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_run_times_out_instead_of_matching_nothing() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 100, 0);
    seed_triggered(&catalog, 101, 0);
    catalog.slow_run(101, Duration::from_secs(30));
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Range { first: 100, last: 101 });
    let catalogs = catalogs(&catalog).with_timeout(Duration::from_secs(1));

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs).await.unwrap();
    assert_eq!(resolution.results.len(), 1);
    assert_eq!(resolution.summary.failures.len(), 1);
    assert!(resolution.summary.failures[0].timed_out);
}

#[tokio::test]
async fn unavailable_catalog_aborts() {
    let catalog = InMemoryCatalog::new();
    seed_triggered(&catalog, 100, 0);
    catalog.set_unavailable(true);
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));

    let err = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap_err();
    assert!(matches!(err, ProdError::CatalogUnavailable(_)));
}

#[tokio::test]
async fn run_quality_cuts_drop_runs() {
    let catalog = InMemoryCatalog::new();
    for run in [100, 101, 102] {
        seed_triggered(&catalog, run, 0);
    }
    catalog.add_run(RunInfo {
        run: 100,
        run_type: "physics".into(),
        events: 1_000_000,
        duration_secs: 3600,
    });
    catalog.add_run(RunInfo {
        run: 101,
        run_type: "cosmics".into(),
        events: 1_000_000,
        duration_secs: 3600,
    });
    let rule = support::builder("DST_TRIGGERED_EVENT", RunSelection::List(vec![100, 101, 102]))
        .quality(RunQualityCuts {
            require_run_type: true,
            min_events: 1000,
            min_duration_secs: 0,
        })
        .finish(&Topology::builtin())
        .unwrap();

    let resolution = resolve(&rule, &Topology::builtin(), &catalogs(&catalog))
        .await
        .unwrap();
    let runs: Vec<u32> = resolution.results.iter().map(|r| r.run).collect();
    assert_eq!(runs, vec![100]);
    assert_eq!(resolution.summary.excluded(ExclusionReason::RunQuality), 2);
}

#[tokio::test]
async fn sqlite_catalog_resolves_like_memory() {
    let memory = InMemoryCatalog::new();
    let sqlite = SqliteCatalog::open_in_memory().await.unwrap();
    for segment in 0..2 {
        for host in TRIGGERED_HOSTS.iter().chain(["gl1daq"].iter()) {
            let record = raw(host, 100, segment, FileStatus::Valid);
            sqlite.insert_file(&record, None).await.unwrap();
            memory.add_file(record, None);
        }
    }
    let rule = rule("DST_TRIGGERED_EVENT", RunSelection::Single(100));
    let topology = Topology::builtin();

    let from_sqlite = resolve(&rule, &topology, &Catalogs::new(&sqlite, &sqlite))
        .await
        .unwrap();
    let from_memory = resolve(&rule, &topology, &Catalogs::new(&memory, &memory))
        .await
        .unwrap();
    assert_eq!(from_sqlite, from_memory);
    assert_eq!(from_sqlite.results.len(), 2);
}
