//! Experiment driver: optional bulk load, then each workload phase in order.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::barrier::{BarrierOutcome, CompactionBarrier, DEFAULT_POLL_INTERVAL};
use crate::config::{render_setup_table, ExperimentConfig};
use crate::error::{BenchError, Result};
use crate::executor::{RunStatistics, WorkloadExecutor};
use crate::instrument::{
    render_instrumentation, render_lsm_layout, render_perf_report, render_statistics,
    render_store_statistics, Instrumentation, InstrumentationReport,
};
use crate::latency::fmt_duration;
use crate::loader::{BulkLoader, LoadReport};
use crate::metrics::drop_page_cache;
use crate::store::{LevelSummary, Store};
use crate::trace::{count_instructions, ParseMode, TraceReader};

/// Everything a run needs besides the engine configuration.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub db_path: PathBuf,
    /// Initial dataset and how to load it.
    pub bulk_load: Option<(PathBuf, BulkLoader)>,
    /// Replayed in order, each against a fresh open of the store.
    pub workloads: Vec<PathBuf>,
    pub poll_interval: Duration,
    pub perf: bool,
    pub destroy_first: bool,
    /// Drop the OS page cache before the first phase.
    pub clear_system_cache: bool,
    /// Print setup, layout and statistics tables to stdout as phases finish.
    pub print_tables: bool,
}

impl RunPlan {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            bulk_load: None,
            workloads: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            perf: false,
            destroy_first: false,
            clear_system_cache: false,
            print_tables: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadPhaseReport {
    pub trace: PathBuf,
    pub load: LoadReport,
    pub levels: Vec<LevelSummary>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub trace: PathBuf,
    /// Non-blank lines in the trace.
    pub workload_size: u64,
    pub statistics: RunStatistics,
    pub barrier: BarrierOutcome,
    pub levels: Vec<LevelSummary>,
    pub instrumentation: InstrumentationReport,
    /// Engine statistics dump taken at close.
    pub store_statistics: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub engine: &'static str,
    pub db_path: PathBuf,
    pub config: ExperimentConfig,
    pub load: Option<LoadPhaseReport>,
    pub phases: Vec<PhaseReport>,
    pub elapsed: Duration,
}

fn open_store<S: Store>(path: &Path, config: &ExperimentConfig) -> Result<S> {
    S::open(path, config).map_err(|source| BenchError::Configuration {
        path: path.to_path_buf(),
        source,
    })
}

fn trace_io(path: &Path) -> impl FnOnce(std::io::Error) -> BenchError + '_ {
    move |source| BenchError::TraceIo {
        path: path.to_path_buf(),
        source,
    }
}

/// Run a whole experiment against engine `S`.
pub fn run_experiment<S: Store>(plan: &RunPlan, config: &ExperimentConfig) -> Result<RunReport> {
    config.validate()?;
    let started = Instant::now();

    if plan.destroy_first {
        tracing::info!(path = %plan.db_path.display(), "destroying existing store");
        S::destroy(&plan.db_path)?;
    }
    if plan.clear_system_cache {
        match drop_page_cache() {
            Ok(()) => tracing::info!("system page cache cleared"),
            Err(e) => tracing::warn!(error = %e, "could not clear system page cache"),
        }
    }

    let load = match &plan.bulk_load {
        Some((trace, loader)) => Some(load_phase::<S>(plan, config, trace, loader)?),
        None => None,
    };

    let mut phases = Vec::with_capacity(plan.workloads.len());
    for trace in &plan.workloads {
        phases.push(workload_phase::<S>(plan, config, trace)?);
    }

    Ok(RunReport {
        engine: S::NAME,
        db_path: plan.db_path.clone(),
        config: config.clone(),
        load,
        phases,
        elapsed: started.elapsed(),
    })
}

fn load_phase<S: Store>(
    plan: &RunPlan,
    config: &ExperimentConfig,
    trace: &Path,
    loader: &BulkLoader,
) -> Result<LoadPhaseReport> {
    let started = Instant::now();
    tracing::info!(
        trace = %trace.display(),
        strategy = loader.label(),
        "bulk load phase starting"
    );
    let store: S = open_store(&plan.db_path, &config.bulk_load_profile())?;
    let load = loader.load(&store, trace)?;
    let levels = store.level_summary()?;
    let dump = store.close()?;
    let elapsed = started.elapsed();

    if plan.print_tables {
        println!(
            "Bulk load ({}): {} records in {}",
            load.strategy,
            load.records,
            fmt_duration(elapsed)
        );
        print!("{}", render_lsm_layout(&levels));
        print!("{}", render_store_statistics(dump.as_deref()));
    }
    Ok(LoadPhaseReport {
        trace: trace.to_path_buf(),
        load,
        levels,
        elapsed,
    })
}

fn workload_phase<S: Store>(
    plan: &RunPlan,
    config: &ExperimentConfig,
    trace: &Path,
) -> Result<PhaseReport> {
    let started = Instant::now();
    let workload_size = count_instructions(trace).map_err(trace_io(trace))?;
    tracing::info!(
        trace = %trace.display(),
        instructions = workload_size,
        "workload phase starting"
    );

    let store: S = open_store(&plan.db_path, config)?;
    let barrier = CompactionBarrier::attach(&store);
    if plan.print_tables {
        print!("{}", render_setup_table(config, workload_size));
    }

    let reader = TraceReader::open(trace, ParseMode::Lenient).map_err(trace_io(trace))?;
    let mut executor = WorkloadExecutor::new(&store)?;
    let instrumentation = Instrumentation::<S>::begin(plan.perf);
    executor.replay(reader).map_err(trace_io(trace))?;
    let (statistics, barrier_outcome) = executor.finish(&barrier, plan.poll_interval)?;
    let levels = store.level_summary()?;
    let store_statistics = store.close()?;
    let instrumentation = instrumentation.finish();
    let elapsed = started.elapsed();

    if statistics.operation_errors > 0 {
        tracing::warn!(
            errors = statistics.operation_errors,
            "some operations failed during replay"
        );
    }
    tracing::info!(
        trace = %trace.display(),
        elapsed_ms = elapsed.as_millis() as u64,
        "workload phase complete"
    );
    if plan.print_tables {
        print!("{}", render_lsm_layout(&levels));
        print!("{}", render_statistics(&statistics));
        print!("{}", render_instrumentation(&instrumentation));
        print!("{}", render_store_statistics(store_statistics.as_deref()));
        if let Some(report) = &instrumentation.perf_report {
            print!("{}", render_perf_report(report));
        }
        println!("Workload time: {}", fmt_duration(elapsed));
    }

    Ok(PhaseReport {
        trace: trace.to_path_buf(),
        workload_size,
        statistics,
        barrier: barrier_outcome,
        levels,
        instrumentation,
        store_statistics,
        elapsed,
    })
}
