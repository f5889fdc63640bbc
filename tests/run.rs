//! End-to-end experiment runs on the in-process engine.

mod common;

use std::time::Duration;

use lsm_benchmarks::config::ExperimentConfig;
use lsm_benchmarks::error::BenchError;
use lsm_benchmarks::loader::BulkLoader;
use lsm_benchmarks::run::{run_experiment, RunPlan};
use lsm_benchmarks::store::{SimStore, Store};
use tempfile::TempDir;

use common::{shuffled_inserts, write_trace};

fn small_config() -> ExperimentConfig {
    ExperimentConfig {
        size_ratio: 4,
        buffer_size_in_pages: 4,
        entries_per_page: 4,
        entry_size: 32,
        level0_file_num_compaction_trigger: 2,
        ..Default::default()
    }
}

fn plan(dir: &TempDir) -> RunPlan {
    RunPlan {
        poll_interval: Duration::from_millis(50),
        ..RunPlan::new(dir.path().join("db"))
    }
}

#[test]
fn load_then_two_workloads() {
    let dir = TempDir::new().unwrap();
    let lines = shuffled_inserts(200, 1);
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let load = write_trace(dir.path(), "load.txt", &refs);
    let w1 = write_trace(
        dir.path(),
        "workload.txt",
        &["Q key00000007", "Q missing", "U key00000007 new", "D key00000008", "S key00000000 key00000010"],
    );
    let w2 = write_trace(dir.path(), "query_workload.txt", &["Q key00000007", "Q key00000008"]);

    let plan = RunPlan {
        bulk_load: Some((load, BulkLoader::default())),
        workloads: vec![w1, w2],
        ..plan(&dir)
    };
    let report = run_experiment::<SimStore>(&plan, &small_config()).unwrap();

    assert_eq!(report.engine, "sim");
    assert_eq!(report.load.as_ref().unwrap().load.records, 200);
    assert_eq!(report.phases.len(), 2);

    let first = &report.phases[0].statistics;
    assert_eq!(first.found_count, 1);
    assert_eq!(first.not_found_count, 1);
    // key00000000..key00000009 minus the deleted key00000008.
    assert_eq!(first.scanned_entries, 9);
    assert_eq!(report.phases[0].workload_size, 5);

    // The second phase reopens the store and sees the first phase's writes.
    let second = &report.phases[1].statistics;
    assert_eq!(second.found_count, 1);
    assert_eq!(second.not_found_count, 1);

    let store = SimStore::open(&plan.db_path, &small_config()).unwrap();
    assert_eq!(store.get(b"key00000007").unwrap(), Some(b"new".to_vec()));
    store.close().unwrap();
}

#[test]
fn destroy_first_discards_previous_data() {
    let dir = TempDir::new().unwrap();
    let w = write_trace(dir.path(), "w.txt", &["I a 1"]);
    let q = write_trace(dir.path(), "q.txt", &["Q a"]);

    let first = RunPlan {
        workloads: vec![w],
        ..plan(&dir)
    };
    run_experiment::<SimStore>(&first, &small_config()).unwrap();

    let second = RunPlan {
        workloads: vec![q],
        destroy_first: true,
        ..plan(&dir)
    };
    let report = run_experiment::<SimStore>(&second, &small_config()).unwrap();
    assert_eq!(report.phases[0].statistics.not_found_count, 1);
}

#[test]
fn missing_workload_trace_is_fatal() {
    let dir = TempDir::new().unwrap();
    let plan = RunPlan {
        workloads: vec![dir.path().join("absent.txt")],
        ..plan(&dir)
    };
    match run_experiment::<SimStore>(&plan, &small_config()) {
        Err(BenchError::TraceIo { path, .. }) => assert!(path.ends_with("absent.txt")),
        other => panic!("expected trace error, got {:?}", other.map(|r| r.phases.len())),
    }
}

#[test]
fn invalid_config_is_rejected_before_touching_the_store() {
    let dir = TempDir::new().unwrap();
    let config = ExperimentConfig {
        size_ratio: 0,
        ..small_config()
    };
    let err = run_experiment::<SimStore>(&plan(&dir), &config).unwrap_err();
    assert!(matches!(err, BenchError::InvalidConfig(_)));
    assert!(!dir.path().join("db").exists());
}

#[test]
fn report_serializes_to_json() {
    let dir = TempDir::new().unwrap();
    let w = write_trace(dir.path(), "w.txt", &["I a 1", "Q a"]);
    let plan = RunPlan {
        workloads: vec![w],
        perf: true,
        ..plan(&dir)
    };
    let report = run_experiment::<SimStore>(&plan, &small_config()).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["engine"], "sim");
    assert_eq!(json["phases"][0]["statistics"]["found_count"], 1);
    assert!(json["phases"][0]["instrumentation"]["perf_report"]
        .as_str()
        .unwrap()
        .contains("get_from_memtable_count = 1"));
}

#[test]
fn page_cache_drop_failure_does_not_abort_the_run() {
    let dir = TempDir::new().unwrap();
    let w = write_trace(dir.path(), "w.txt", &["I a 1", "Q a"]);
    let plan = RunPlan {
        workloads: vec![w],
        clear_system_cache: true,
        ..plan(&dir)
    };
    // Unprivileged runs cannot write drop_caches; the run still completes.
    let report = run_experiment::<SimStore>(&plan, &small_config()).unwrap();
    assert_eq!(report.phases[0].statistics.found_count, 1);
}
