//! Trace-driven workload harness for LSM-tree key-value stores.
//!
//! A run optionally bulk-loads an initial dataset, then replays workload
//! traces (`I`/`U`/`D`/`Q`/`S` lines) against a [`store::Store`], waits for
//! background compaction to drain, and reports what happened.

pub mod barrier;
pub mod config;
pub mod error;
pub mod executor;
pub mod instrument;
pub mod latency;
pub mod loader;
pub mod metrics;
pub mod run;
pub mod store;
pub mod trace;

pub use barrier::{BarrierOutcome, CompactionBarrier, QuiescenceState, DEFAULT_POLL_INTERVAL};
pub use config::{render_setup_table, ExperimentConfig};
pub use error::{BenchError, IngestError, Result, StoreError, TraceError};
pub use executor::{RunStatistics, WorkloadExecutor};
pub use loader::{BulkLoader, LoadReport, DEFAULT_BATCH_SIZE};
pub use run::{run_experiment, PhaseReport, RunPlan, RunReport};
pub use store::{SimStore, Store};
pub use trace::{Instruction, ParseMode, TraceReader};
