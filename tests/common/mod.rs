//! Shared test utilities: trace fixtures and store helpers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lsm_benchmarks::config::ExperimentConfig;
use lsm_benchmarks::error::StoreError;
use lsm_benchmarks::store::{
    CompactionObserver, IntProperty, LevelSummary, SimOptions, SimStore, Store, StoreCursor,
    WriteDurability,
};
use tempfile::TempDir;

/// Write `lines` (newline-terminated) to `name` inside `dir`.
pub fn write_trace(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(&path, body).expect("failed to write trace");
    path
}

/// Small buffers so a few hundred writes trigger flushes and compactions.
pub fn small_options() -> SimOptions {
    SimOptions {
        write_buffer_size: 512,
        level0_compaction_trigger: 2,
        level_base_bytes: 2048,
        size_ratio: 4,
        num_levels: 4,
        compaction_delay: Duration::ZERO,
    }
}

pub fn open_sim(dir: &TempDir) -> SimStore {
    SimStore::open_with(&dir.path().join("db"), small_options()).expect("failed to open sim store")
}

/// Every live entry, in key order, read through a cursor.
pub fn dump_store<S: Store>(store: &S) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut cursor = store.new_cursor().expect("cursor");
    cursor.seek(b"");
    let mut out = BTreeMap::new();
    while cursor.valid() {
        let key = cursor.key().expect("key").to_vec();
        let value = cursor.value().expect("value").to_vec();
        out.insert(key, value);
        cursor.next();
    }
    cursor.status().expect("cursor status");
    out
}

pub fn kv(pairs: &[(&str, &str)]) -> BTreeMap<Vec<u8>, Vec<u8>> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

/// Deterministic insert trace: `count` keys in shuffled order.
pub fn shuffled_inserts(count: u64, seed: u64) -> Vec<String> {
    let mut keys: Vec<u64> = (0..count).collect();
    let mut state = seed.wrapping_add(0x9e3779b97f4a7c15);
    for i in (1..keys.len()).rev() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = ((state >> 33) % (i as u64 + 1)) as usize;
        keys.swap(i, j);
    }
    keys.into_iter()
        .map(|k| format!("I key{:08} value{:08}", k, k))
        .collect()
}

// =============================================================================
// Fault injection
// =============================================================================

/// Store operation a [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Put,
    Get,
    WriteBatch,
    Ingest,
}

/// Forwards to `inner`, failing the `nth` (0-based) call to one operation.
pub struct FaultyStore<S> {
    pub inner: S,
    point: FaultPoint,
    nth: u64,
    calls: AtomicU64,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S, point: FaultPoint, nth: u64) -> Self {
        Self {
            inner,
            point,
            nth,
            calls: AtomicU64::new(0),
        }
    }

    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        if point == self.point && self.calls.fetch_add(1, Ordering::SeqCst) == self.nth {
            return Err(match point {
                FaultPoint::Ingest => StoreError::IngestRejected("injected failure".into()),
                _ => StoreError::Engine(format!("injected {:?} failure", point)),
            });
        }
        Ok(())
    }
}

impl<S: Store> Store for FaultyStore<S> {
    type Cursor<'a> = S::Cursor<'a> where Self: 'a;
    type FileWriter<'a> = S::FileWriter<'a> where Self: 'a;

    const NAME: &'static str = S::NAME;

    fn open(path: &Path, config: &ExperimentConfig) -> Result<Self, StoreError> {
        Ok(Self::new(S::open(path, config)?, FaultPoint::Put, u64::MAX))
    }

    fn destroy(path: &Path) -> Result<(), StoreError> {
        S::destroy(path)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check(FaultPoint::Put)?;
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(FaultPoint::Get)?;
        self.inner.get(key)
    }

    fn new_cursor(&self) -> Result<Self::Cursor<'_>, StoreError> {
        self.inner.new_cursor()
    }

    fn sorted_file_writer(&self, path: &Path) -> Result<Self::FileWriter<'_>, StoreError> {
        self.inner.sorted_file_writer(path)
    }

    fn ingest_sorted_file(&self, path: &Path) -> Result<(), StoreError> {
        self.check(FaultPoint::Ingest)?;
        self.inner.ingest_sorted_file(path)
    }

    fn write_batch(
        &self,
        batch: &[(Vec<u8>, Vec<u8>)],
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.check(FaultPoint::WriteBatch)?;
        self.inner.write_batch(batch, durability)
    }

    fn register_compaction_observer(&self, observer: CompactionObserver) {
        self.inner.register_compaction_observer(observer)
    }

    fn int_property(&self, property: IntProperty) -> Result<u64, StoreError> {
        self.inner.int_property(property)
    }

    fn flush_live_files(&self) -> Result<(), StoreError> {
        self.inner.flush_live_files()
    }

    fn level_summary(&self) -> Result<Vec<LevelSummary>, StoreError> {
        self.inner.level_summary()
    }

    fn close(self) -> Result<Option<String>, StoreError> {
        self.inner.close()
    }

    fn enable_perf_context() {
        S::enable_perf_context()
    }

    fn take_perf_context() -> Option<String> {
        S::take_perf_context()
    }
}
