//! Storage-engine collaborator interface.
//!
//! The harness only drives an engine through [`Store`]; compaction, file
//! formats and caching stay behind it. Two engines are provided: the
//! in-process [`SimStore`] and, with the `rocksdb` feature, `RocksStore`.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ExperimentConfig;
use crate::error::StoreError;

#[cfg(feature = "rocksdb")]
mod rocks;
mod sim;

#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use sim::{SimOptions, SimStore};

/// Callback invoked by the engine, on one of its own threads, whenever a
/// compaction finishes.
pub type CompactionObserver = Arc<dyn Fn() + Send + Sync>;

/// Integer properties the quiescence barrier polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntProperty {
    RunningCompactions,
    PendingCompactionBytes,
    PendingCompactionCount,
}

impl IntProperty {
    pub const ALL: [Self; 3] = [
        Self::RunningCompactions,
        Self::PendingCompactionBytes,
        Self::PendingCompactionCount,
    ];

    /// Engine-level property name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunningCompactions => "rocksdb.num-running-compactions",
            Self::PendingCompactionBytes => "rocksdb.estimate-pending-compaction-bytes",
            Self::PendingCompactionCount => "rocksdb.compaction-pending",
        }
    }
}

/// Durability settings for a grouped write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteDurability {
    pub sync: bool,
    pub disable_wal: bool,
}

impl WriteDurability {
    /// Normal writes: WAL on, no fsync per write.
    pub fn standard() -> Self {
        Self {
            sync: false,
            disable_wal: false,
        }
    }

    /// Bulk-load writes: WAL off. The caller must flush afterwards.
    pub fn relaxed() -> Self {
        Self {
            sync: false,
            disable_wal: true,
        }
    }
}

impl Default for WriteDurability {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-level shape of the on-disk tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub level: usize,
    pub files: usize,
    pub entries: u64,
    pub deletions: u64,
    pub bytes: u64,
}

/// Range cursor over the committed view of a store.
pub trait StoreCursor {
    /// Re-pin the cursor to the most recent committed state.
    fn refresh(&mut self) -> Result<(), StoreError>;
    /// Position at the first key `>= key`.
    fn seek(&mut self, key: &[u8]);
    fn valid(&self) -> bool;
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    fn next(&mut self);
    /// Error state left by the last positioning call, if any.
    fn status(&self) -> Result<(), StoreError>;
}

/// Writer for an externally built sorted file.
pub trait SortedFileWriter {
    /// Append an entry. Keys must be strictly ascending.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    /// Seal the file, returning the number of entries written.
    fn finish(self) -> Result<u64, StoreError>;
}

/// Ordered key-value engine driven by the harness.
pub trait Store: Send + Sync + Sized {
    type Cursor<'a>: StoreCursor
    where
        Self: 'a;
    type FileWriter<'a>: SortedFileWriter
    where
        Self: 'a;

    /// Short engine name used in reports.
    const NAME: &'static str;

    fn open(path: &Path, config: &ExperimentConfig) -> Result<Self, StoreError>;

    /// Remove all on-disk state at `path`.
    fn destroy(path: &Path) -> Result<(), StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` means the key is absent; `Err` is any other failure.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn new_cursor(&self) -> Result<Self::Cursor<'_>, StoreError>;

    fn sorted_file_writer(&self, path: &Path) -> Result<Self::FileWriter<'_>, StoreError>;

    /// Atomically add a finished sorted file to the store.
    fn ingest_sorted_file(&self, path: &Path) -> Result<(), StoreError>;

    fn write_batch(
        &self,
        batch: &[(Vec<u8>, Vec<u8>)],
        durability: WriteDurability,
    ) -> Result<(), StoreError>;

    /// Observers live as long as the store stays open.
    fn register_compaction_observer(&self, observer: CompactionObserver);

    fn int_property(&self, property: IntProperty) -> Result<u64, StoreError>;

    /// Materialize in-memory state into durable files.
    fn flush_live_files(&self) -> Result<(), StoreError>;

    fn level_summary(&self) -> Result<Vec<LevelSummary>, StoreError>;

    /// Close the store and return its cumulative statistics dump, if any.
    fn close(self) -> Result<Option<String>, StoreError>;

    /// Reset and enable the calling thread's perf context.
    fn enable_perf_context();

    /// Disable the calling thread's perf context and return its report in
    /// `key = value, ...` form.
    fn take_perf_context() -> Option<String>;
}
