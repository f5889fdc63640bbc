//! Error taxonomy for the workload harness.
//!
//! Fatal errors (`BenchError`) abort a run. Per-instruction failures never
//! leave the replay loop: they are logged and counted in `RunStatistics`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::trace::ParseError;

/// Errors reported by a storage engine through the `Store` interface.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("engine error: {0}")]
    Engine(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("key out of order in sorted file: {key:?} is not greater than {previous:?}")]
    OutOfOrder { previous: String, key: String },

    #[error("sorted file is empty")]
    EmptyFile,

    #[error("ingestion rejected: {0}")]
    IngestRejected(String),

    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Engine(e.into_string())
    }
}

/// Errors produced while reading a trace file.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("trace read failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors that abort a bulk-load phase.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read bulk-load trace {path}: {source}")]
    TraceIo { path: PathBuf, source: io::Error },

    #[error("bulk-load trace rejected: {0}")]
    Parse(ParseError),

    #[error("failed to create staging file: {0}")]
    Staging(io::Error),

    #[error("failed to write sorted file: {0}")]
    Writer(StoreError),

    #[error("ingestion of {path} failed: {source}")]
    Rejected { path: PathBuf, source: StoreError },

    #[error("write batch {index} failed: {source}")]
    Batch { index: usize, source: StoreError },

    #[error("flush after load failed: {0}")]
    Flush(StoreError),
}

/// Fatal errors surfaced to the caller of a run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to open store at {path}: {source}")]
    Configuration { path: PathBuf, source: StoreError },

    #[error("failed to read trace {path}: {source}")]
    TraceIo { path: PathBuf, source: io::Error },

    #[error("bulk load failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
