//! Bulk loading of an initial dataset.
//!
//! Both strategies read the trace in strict mode and load only `I` records.
//! Other recognised instructions are ignored, lines with a bad operand count
//! are skipped, and an unknown tag aborts the load.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{IngestError, TraceError};
use crate::store::{SortedFileWriter, Store, WriteDurability};
use crate::trace::{Instruction, ParseMode, TraceReader};

/// Records per grouped write in the batched strategy.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Bulk-load strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkLoader {
    /// Sort every insert in memory, write one sorted file and ingest it.
    SortedIngest {
        /// Where the staging file goes; next to the trace when `None`.
        staging_dir: Option<PathBuf>,
    },
    /// Stream inserts as grouped writes with the WAL disabled.
    BatchedWrite { batch_size: usize },
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::SortedIngest { staging_dir: None }
    }
}

impl BulkLoader {
    pub fn batched() -> Self {
        Self::BatchedWrite {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SortedIngest { .. } => "sorted-ingest",
            Self::BatchedWrite { .. } => "batched-write",
        }
    }

    /// Load every insert record of `trace` into `store`.
    pub fn load<S: Store>(&self, store: &S, trace: &Path) -> Result<LoadReport, IngestError> {
        let started = Instant::now();
        let mut report = match self {
            Self::SortedIngest { staging_dir } => {
                sorted_ingest(store, trace, staging_dir.as_deref())?
            }
            Self::BatchedWrite { batch_size } => batched_write(store, trace, *batch_size)?,
        };
        report.elapsed = started.elapsed();
        tracing::info!(
            strategy = report.strategy,
            records = report.records,
            batches = report.batches,
            skipped = report.skipped_lines,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "bulk load complete"
        );
        Ok(report)
    }
}

impl fmt::Display for BulkLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one bulk load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub strategy: &'static str,
    pub records: u64,
    /// Grouped writes submitted, or 1 for an ingested file.
    pub batches: u64,
    /// Lines rejected by the strict reader.
    pub skipped_lines: u64,
    pub elapsed: Duration,
}

/// Strict pass over a trace yielding only insert records.
struct InsertRecords {
    reader: TraceReader<std::io::BufReader<std::fs::File>>,
    skipped: u64,
}

impl InsertRecords {
    fn open(trace: &Path) -> Result<Self, IngestError> {
        let reader =
            TraceReader::open(trace, ParseMode::Strict).map_err(|source| IngestError::TraceIo {
                path: trace.to_path_buf(),
                source,
            })?;
        Ok(Self { reader, skipped: 0 })
    }

    fn next_record(&mut self, trace: &Path) -> Result<Option<(Vec<u8>, Vec<u8>)>, IngestError> {
        loop {
            match self.reader.next() {
                None => return Ok(None),
                Some(Ok(Instruction::Insert { key, value })) => return Ok(Some((key, value))),
                Some(Ok(_)) => continue,
                Some(Err(TraceError::Parse(e))) if e.is_unknown_tag() => {
                    return Err(IngestError::Parse(e));
                }
                Some(Err(TraceError::Parse(e))) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "skipping invalid bulk-load line");
                }
                Some(Err(TraceError::Io(source))) => {
                    return Err(IngestError::TraceIo {
                        path: trace.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}

fn sorted_ingest<S: Store>(
    store: &S,
    trace: &Path,
    staging_dir: Option<&Path>,
) -> Result<LoadReport, IngestError> {
    let mut records = InsertRecords::open(trace)?;
    let mut pairs = Vec::new();
    while let Some(pair) = records.next_record(trace)? {
        pairs.push(pair);
    }
    let mut report = LoadReport {
        strategy: "sorted-ingest",
        skipped_lines: records.skipped,
        ..Default::default()
    };
    if pairs.is_empty() {
        tracing::info!(trace = %trace.display(), "no insert records to ingest");
        return Ok(report);
    }
    // Stable, so duplicate keys stay adjacent and the writer rejects them.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let dir = match staging_dir {
        Some(dir) => dir.to_path_buf(),
        None => trace
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let staging = tempfile::Builder::new()
        .prefix("bulk-load-")
        .suffix(".sst")
        .tempfile_in(&dir)
        .map_err(IngestError::Staging)?
        .into_temp_path();

    let mut writer = store
        .sorted_file_writer(&staging)
        .map_err(IngestError::Writer)?;
    for (key, value) in &pairs {
        writer.put(key, value).map_err(IngestError::Writer)?;
    }
    let written = writer.finish().map_err(IngestError::Writer)?;

    store
        .ingest_sorted_file(&staging)
        .map_err(|source| IngestError::Rejected {
            path: staging.to_path_buf(),
            source,
        })?;
    // Engines that ingest by moving the file leave nothing to remove.
    match staging.close() {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(error = %e, "failed to remove staging file");
        }
        _ => {}
    }

    report.records = written;
    report.batches = 1;
    Ok(report)
}

fn batched_write<S: Store>(
    store: &S,
    trace: &Path,
    batch_size: usize,
) -> Result<LoadReport, IngestError> {
    let batch_size = batch_size.max(1);
    let durability = WriteDurability::relaxed();
    let mut records = InsertRecords::open(trace)?;
    let mut batch = Vec::with_capacity(batch_size);
    let mut index = 0usize;
    let mut loaded = 0u64;

    let mut submit = |batch: &mut Vec<(Vec<u8>, Vec<u8>)>, index: &mut usize| {
        store
            .write_batch(batch, durability)
            .map_err(|source| IngestError::Batch {
                index: *index,
                source,
            })?;
        loaded += batch.len() as u64;
        *index += 1;
        batch.clear();
        Ok::<_, IngestError>(())
    };

    while let Some(pair) = records.next_record(trace)? {
        batch.push(pair);
        if batch.len() == batch_size {
            submit(&mut batch, &mut index)?;
        }
    }
    if !batch.is_empty() {
        submit(&mut batch, &mut index)?;
    }

    store.flush_live_files().map_err(IngestError::Flush)?;

    Ok(LoadReport {
        strategy: "batched-write",
        records: loaded,
        batches: index as u64,
        skipped_lines: records.skipped,
        elapsed: Duration::ZERO,
    })
}
