use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use lsm_benchmarks::loader::{BulkLoader, DEFAULT_BATCH_SIZE};
use lsm_benchmarks::run::{run_experiment, RunPlan, RunReport};
use lsm_benchmarks::store::{SimStore, Store};
use lsm_benchmarks::ExperimentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// In-process reference engine
    Sim,
    /// RocksDB (requires the `rocksdb` cargo feature)
    Rocksdb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LoadStrategy {
    /// Sort inserts, write one sorted file and ingest it
    SortedIngest,
    /// Grouped writes with the WAL disabled
    BatchedWrite,
}

#[derive(Parser, Debug)]
#[command(name = "lsm-bench", version, about = "Replay workload traces against an LSM-tree store")]
struct Cli {
    /// Engine configuration file (TOML). Defaults are used if it is absent.
    #[arg(short, long, default_value = "lsm-bench.toml")]
    config: PathBuf,

    /// Database directory
    #[arg(long, default_value = "db_working_home")]
    db: PathBuf,

    #[arg(long, value_enum, default_value_t = Engine::Sim)]
    engine: Engine,

    /// Trace whose insert records form the initial dataset
    #[arg(long)]
    bulk_load: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LoadStrategy::SortedIngest)]
    load_strategy: LoadStrategy,

    /// Records per grouped write for the batched strategy
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Workload traces, replayed in order
    #[arg(short, long = "workload")]
    workloads: Vec<PathBuf>,

    /// Collect per-thread perf context during each workload
    #[arg(long)]
    perf: bool,

    /// Destroy any existing database first
    #[arg(long)]
    destroy: bool,

    /// Drop the OS page cache before the first phase (needs root)
    #[arg(long)]
    clear_system_cache: bool,

    /// Upper bound on a single wait between compaction polls
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,

    /// Print the run report as JSON instead of tables
    #[arg(long)]
    json: bool,

    /// Print the default engine configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("lsm-bench: error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<ExperimentConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        return Ok(ExperimentConfig::default());
    }
    ExperimentConfig::from_toml_file(path)
        .with_context(|| format!("Cannot load config: {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    if cli.print_default_config {
        print!("{}", ExperimentConfig::default().to_toml());
        return Ok(());
    }
    if cli.bulk_load.is_none() && cli.workloads.is_empty() {
        bail!("nothing to do: pass --bulk-load and/or --workload");
    }

    let config = load_config(&cli.config)?;
    let loader = match cli.load_strategy {
        LoadStrategy::SortedIngest => BulkLoader::SortedIngest {
            staging_dir: cli
                .db
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf),
        },
        LoadStrategy::BatchedWrite => BulkLoader::BatchedWrite {
            batch_size: cli.batch_size,
        },
    };
    let plan = RunPlan {
        db_path: cli.db.clone(),
        bulk_load: cli.bulk_load.clone().map(|trace| (trace, loader)),
        workloads: cli.workloads.clone(),
        poll_interval: Duration::from_millis(cli.poll_ms.max(1)),
        perf: cli.perf,
        destroy_first: cli.destroy,
        clear_system_cache: cli.clear_system_cache,
        print_tables: !cli.json,
    };

    let report = match cli.engine {
        Engine::Sim => run_with::<SimStore>(&plan, &config)?,
        Engine::Rocksdb => run_rocksdb(&plan, &config)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Total time: {}",
            lsm_benchmarks::latency::fmt_duration(report.elapsed)
        );
    }
    Ok(())
}

fn run_with<S: Store>(plan: &RunPlan, config: &ExperimentConfig) -> Result<RunReport> {
    run_experiment::<S>(plan, config)
        .with_context(|| format!("{} run against {} failed", S::NAME, plan.db_path.display()))
}

#[cfg(feature = "rocksdb")]
fn run_rocksdb(plan: &RunPlan, config: &ExperimentConfig) -> Result<RunReport> {
    run_with::<lsm_benchmarks::store::RocksStore>(plan, config)
}

#[cfg(not(feature = "rocksdb"))]
fn run_rocksdb(_plan: &RunPlan, _config: &ExperimentConfig) -> Result<RunReport> {
    bail!("this build has no RocksDB support; rebuild with `--features rocksdb`")
}
