//! Trace parsing and replay benchmarks.
//!
//! Parsing is measured on in-memory lines; replay runs a generated workload
//! against a pre-loaded in-process store for each buffer size.

#[allow(unused)]
#[path = "harness/mod.rs"]
mod harness;

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use harness::{
    create_store, key, measure_percentiles, report_percentiles, value, write_insert_trace,
    write_workload_trace, BufferConfig, WorkloadMix, PERCENTILE_SAMPLES, WARMUP_COUNT,
};
use lsm_benchmarks::barrier::CompactionBarrier;
use lsm_benchmarks::executor::WorkloadExecutor;
use lsm_benchmarks::loader::BulkLoader;
use lsm_benchmarks::store::Store;
use lsm_benchmarks::trace::{parse_line, Instruction, ParseMode, TraceReader};

// =============================================================================
// Parsing
// =============================================================================

fn trace_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace/parse");
    group.throughput(Throughput::Elements(1));

    let lines = [
        ("insert", format!("I {} {}", key(7), value(7, 1024))),
        ("query", format!("Q {}", key(7))),
        ("scan", format!("S {} {}", key(7), key(107))),
    ];
    for (name, line) in &lines {
        for mode in [ParseMode::Lenient, ParseMode::Strict] {
            let id = format!("{}/{:?}", name, mode);
            group.bench_function(BenchmarkId::new("line", id), |b| {
                b.iter(|| parse_line(line.as_bytes(), 1, mode).unwrap());
            });
        }
    }
    group.finish();
}

// =============================================================================
// Replay: workload mix × buffer size
// =============================================================================

fn workload_replay(c: &mut Criterion) {
    const OPS: u64 = 5_000;

    let mut group = c.benchmark_group("replay/workload");
    group.throughput(Throughput::Elements(OPS));
    group.sample_size(10);

    for (mix_name, mix) in [
        ("read_heavy", WorkloadMix::READ_HEAVY),
        ("write_heavy", WorkloadMix::WRITE_HEAVY),
    ] {
        for config in BufferConfig::ALL {
            let bench = create_store(config);
            let load = write_insert_trace(bench.dir.path(), WARMUP_COUNT, 64);
            BulkLoader::default()
                .load(&bench.store, &load)
                .expect("bulk load failed");
            let trace = write_workload_trace(bench.dir.path(), OPS, WARMUP_COUNT, mix, 42);

            let id = format!("{}/{}", mix_name, config.label());
            group.bench_function(BenchmarkId::new("buffer", id), |b| {
                b.iter(|| {
                    let reader = TraceReader::open(&trace, ParseMode::Lenient).unwrap();
                    let mut executor = WorkloadExecutor::new(&bench.store).unwrap();
                    executor.replay(reader).unwrap();
                    executor.statistics().instruction_count
                });
            });

            let barrier = CompactionBarrier::attach(&bench.store);
            let outcome = barrier
                .wait_until_idle(&bench.store, Duration::from_millis(100))
                .unwrap();
            eprintln!(
                "  replay/{}/{}: drained in {} polls",
                mix_name,
                config.label(),
                outcome.polls
            );
        }
    }
    group.finish();
}

// =============================================================================
// Single-instruction latency percentiles
// =============================================================================

fn instruction_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay/instruction");
    group.throughput(Throughput::Elements(1));

    eprintln!("\n--- Latency Percentiles: replay/instruction ---");
    for config in BufferConfig::ALL {
        let bench = create_store(config);
        for i in 0..WARMUP_COUNT {
            bench.store.put(key(i).as_bytes(), value(i, 64).as_bytes()).unwrap();
        }
        let query = Instruction::Query {
            key: key(WARMUP_COUNT / 2).into_bytes(),
        };
        let scan = Instruction::ScanRange {
            start: key(100).into_bytes(),
            end: key(200).into_bytes(),
        };

        let mut executor = WorkloadExecutor::new(&bench.store).unwrap();
        for (name, instruction) in [("query", &query), ("scan_100", &scan)] {
            group.bench_function(BenchmarkId::new(name, config.label()), |b| {
                b.iter(|| executor.execute(instruction));
            });
            let label = format!("replay/{}/{}", name, config.label());
            let p = measure_percentiles(PERCENTILE_SAMPLES, || executor.execute(instruction));
            report_percentiles(&label, &p);
        }
    }
    group.finish();
}

criterion_group!(benches, trace_parse, workload_replay, instruction_latency);
criterion_main!(benches);
