//! In-process reference engine.
//!
//! A memtable, a stack of level-0 sorted runs and one sorted run per deeper
//! level, with a single background thread merging runs when a level fills
//! up. It exists so the harness can be exercised end to end without a native
//! engine; it makes no attempt to model real compaction costs.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_skiplist::SkipMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::{
    CompactionObserver, IntProperty, LevelSummary, SortedFileWriter, Store, StoreCursor,
    WriteDurability,
};
use crate::config::ExperimentConfig;
use crate::error::StoreError;

const MANIFEST_FILE: &str = "SIM_MANIFEST.json";
const DEFAULT_NUM_LEVELS: usize = 7;

type Run = Arc<BTreeMap<Vec<u8>, Option<Vec<u8>>>>;

/// Sizing knobs for [`SimStore`].
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub write_buffer_size: u64,
    pub level0_compaction_trigger: usize,
    pub level_base_bytes: u64,
    pub size_ratio: u64,
    pub num_levels: usize,
    /// Artificial duration of every compaction.
    pub compaction_delay: Duration,
}

impl SimOptions {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            write_buffer_size: config.buffer_size(),
            level0_compaction_trigger: config.level0_file_num_compaction_trigger as usize,
            level_base_bytes: config.max_bytes_for_level_base(),
            size_ratio: config.size_ratio as u64,
            num_levels: DEFAULT_NUM_LEVELS,
            compaction_delay: Duration::ZERO,
        }
    }

    fn level_target(&self, level: usize) -> u64 {
        let mut target = self.level_base_bytes;
        for _ in 1..level {
            target = target.saturating_mul(self.size_ratio);
        }
        target
    }
}

impl Default for SimOptions {
    fn default() -> Self {
        Self::from_config(&ExperimentConfig::default())
    }
}

fn run_bytes(run: &Run) -> u64 {
    run.iter()
        .map(|(k, v)| (k.len() + v.as_ref().map_or(0, |v| v.len())) as u64)
        .sum()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// =============================================================================
// Memtable
// =============================================================================

/// User key, then sequence number newest first.
type VersionKey = (Vec<u8>, Reverse<u64>);

/// Multi-version write buffer. Writers append new versions, so a cursor can
/// keep reading an older sequence number while puts continue.
struct Memtable {
    map: SkipMap<VersionKey, Option<Vec<u8>>>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }
}

impl Memtable {
    fn insert(&self, key: &[u8], seq: u64, value: Option<&[u8]>) {
        self.map
            .insert((key.to_vec(), Reverse(seq)), value.map(<[u8]>::to_vec));
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Newest version of `key` written at or before `seq`.
    fn get(&self, key: &[u8], seq: u64) -> Option<Option<Vec<u8>>> {
        let lower = (key.to_vec(), Reverse(seq));
        let entry = self
            .map
            .range::<VersionKey, _>((Bound::Included(lower), Bound::Unbounded))
            .next()?;
        (entry.key().0 == key).then(|| entry.value().clone())
    }

    /// Smallest key past `bound` with a version visible at `seq`.
    fn next_key(&self, bound: Bound<&[u8]>, seq: u64) -> Option<Vec<u8>> {
        let lower = match bound {
            Bound::Included(k) => Bound::Included((k.to_vec(), Reverse(u64::MAX))),
            // Reverse(0) sorts after every version of `k`.
            Bound::Excluded(k) => Bound::Excluded((k.to_vec(), Reverse(0))),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.map
            .range::<VersionKey, _>((lower, Bound::Unbounded))
            .find(|entry| entry.key().1 .0 <= seq)
            .map(|entry| entry.key().0.clone())
    }

    /// Newest version of every key as an immutable run.
    fn to_run(&self) -> Run {
        let mut run = BTreeMap::new();
        for entry in self.map.iter() {
            let (key, _) = entry.key();
            if !run.contains_key(key) {
                run.insert(key.clone(), entry.value().clone());
            }
        }
        Arc::new(run)
    }
}

/// Read view pinned by a cursor. Holding it never blocks or copies writes.
struct Snapshot {
    memtable: Arc<Memtable>,
    seq: u64,
    /// Immutable runs, newest first.
    runs: Vec<Run>,
}

impl Snapshot {
    fn newest(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.memtable
            .get(key, self.seq)
            .or_else(|| self.runs.iter().find_map(|run| run.get(key).cloned()))
    }

    /// Smallest live key past `bound`.
    fn next_visible(&self, bound: Bound<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut bound: Bound<Vec<u8>> = match bound {
            Bound::Included(k) => Bound::Included(k.to_vec()),
            Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
            Bound::Unbounded => Bound::Unbounded,
        };
        loop {
            let lower = match &bound {
                Bound::Included(k) => Bound::Included(&k[..]),
                Bound::Excluded(k) => Bound::Excluded(&k[..]),
                Bound::Unbounded => Bound::Unbounded,
            };
            let candidate = self
                .runs
                .iter()
                .filter_map(|run| {
                    run.range::<[u8], _>((lower, Bound::Unbounded))
                        .next()
                        .map(|(k, _)| k.clone())
                })
                .chain(self.memtable.next_key(lower, self.seq))
                .min()?;
            match self.newest(&candidate) {
                Some(Some(value)) => return Some((candidate, value)),
                _ => bound = Bound::Excluded(candidate),
            }
        }
    }
}

// =============================================================================
// Tree state
// =============================================================================

struct Job {
    /// Number of level-0 runs consumed, or the source level.
    source: JobSource,
    /// Input runs, newest first.
    inputs: Vec<Run>,
    target_level: usize,
    bottommost: bool,
}

enum JobSource {
    Level0(usize),
    Level(usize),
}

#[derive(Default)]
struct Tree {
    memtable: Arc<Memtable>,
    memtable_bytes: u64,
    last_seq: u64,
    /// Oldest first.
    level0: Vec<Run>,
    /// Index 0 is unused; level 0 lives in `level0`.
    levels: Vec<Option<Run>>,
    running: u64,
    shutdown: bool,
}

impl Tree {
    fn freeze_memtable(&mut self) -> bool {
        if self.memtable.is_empty() {
            return false;
        }
        let frozen = std::mem::take(&mut self.memtable);
        self.level0.push(frozen.to_run());
        self.memtable_bytes = 0;
        true
    }

    fn level_bytes(&self, level: usize) -> u64 {
        self.levels
            .get(level)
            .and_then(|r| r.as_ref())
            .map_or(0, run_bytes)
    }

    fn deeper_levels_empty(&self, level: usize) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .all(|r| r.as_ref().map_or(true, |r| r.is_empty()))
    }

    fn pick_compaction(&self, opts: &SimOptions) -> Option<Job> {
        if self.level0.len() >= opts.level0_compaction_trigger {
            let count = self.level0.len();
            let mut inputs: Vec<Run> = self.level0.iter().rev().cloned().collect();
            if let Some(Some(l1)) = self.levels.get(1) {
                inputs.push(Arc::clone(l1));
            }
            return Some(Job {
                source: JobSource::Level0(count),
                inputs,
                target_level: 1,
                bottommost: self.deeper_levels_empty(1),
            });
        }
        let last = self.levels.len().saturating_sub(1);
        for level in 1..last {
            if self.level_bytes(level) > opts.level_target(level) {
                let mut inputs = Vec::with_capacity(2);
                if let Some(run) = &self.levels[level] {
                    inputs.push(Arc::clone(run));
                }
                if let Some(run) = &self.levels[level + 1] {
                    inputs.push(Arc::clone(run));
                }
                return Some(Job {
                    source: JobSource::Level(level),
                    inputs,
                    target_level: level + 1,
                    bottommost: self.deeper_levels_empty(level + 1),
                });
            }
        }
        None
    }

    fn pending_compaction_bytes(&self, opts: &SimOptions) -> u64 {
        let mut pending = 0;
        if self.level0.len() >= opts.level0_compaction_trigger {
            pending += self.level0.iter().map(run_bytes).sum::<u64>();
        }
        let last = self.levels.len().saturating_sub(1);
        for level in 1..last {
            pending += self.level_bytes(level).saturating_sub(opts.level_target(level));
        }
        pending
    }

    fn install(&mut self, job: Job, merged: Run) {
        let merged = if merged.is_empty() { None } else { Some(merged) };
        match job.source {
            JobSource::Level0(count) => {
                self.level0.drain(..count);
            }
            JobSource::Level(level) => {
                self.levels[level] = None;
            }
        }
        self.levels[job.target_level] = merged;
    }

    fn lookup(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.level0
            .iter()
            .rev()
            .chain(self.levels.iter().flatten())
            .find_map(|run| run.get(key).cloned())
    }

    fn snapshot(&self) -> Snapshot {
        let mut runs = Vec::with_capacity(self.level0.len() + self.levels.len());
        runs.extend(self.level0.iter().rev().cloned());
        runs.extend(self.levels.iter().flatten().cloned());
        Snapshot {
            memtable: Arc::clone(&self.memtable),
            seq: self.last_seq,
            runs,
        }
    }
}

/// Merge runs given newest first.
fn merge_runs(inputs: &[Run], drop_tombstones: bool) -> Run {
    let mut merged = BTreeMap::new();
    for run in inputs.iter().rev() {
        for (k, v) in run.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    if drop_tombstones {
        merged.retain(|_, v| v.is_some());
    }
    Arc::new(merged)
}

// =============================================================================
// Persistence
// =============================================================================

type Entries = Vec<(Vec<u8>, Option<Vec<u8>>)>;

#[derive(Serialize, Deserialize)]
struct Manifest {
    level0: Vec<Entries>,
    levels: Vec<Option<Entries>>,
}

fn to_entries(run: &Run) -> Entries {
    run.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn from_entries(entries: Entries) -> Run {
    Arc::new(entries.into_iter().collect())
}

fn load_manifest(dir: &Path, num_levels: usize) -> Result<Tree, StoreError> {
    let path = dir.join(MANIFEST_FILE);
    let mut tree = Tree::default();
    if path.exists() {
        let reader = BufReader::new(File::open(&path)?);
        let manifest: Manifest = serde_json::from_reader(reader)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        tree.level0 = manifest.level0.into_iter().map(from_entries).collect();
        tree.levels = manifest
            .levels
            .into_iter()
            .map(|r| r.map(from_entries))
            .collect();
    }
    if tree.levels.len() < num_levels {
        tree.levels.resize(num_levels, None);
    }
    Ok(tree)
}

fn save_manifest(dir: &Path, tree: &Tree) -> Result<(), StoreError> {
    let manifest = Manifest {
        level0: tree.level0.iter().map(to_entries).collect(),
        levels: tree
            .levels
            .iter()
            .map(|r| r.as_ref().map(to_entries))
            .collect(),
    };
    let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &manifest)
            .map_err(|e| StoreError::Engine(format!("manifest encode failed: {}", e)))?;
        writer.flush()?;
    }
    fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
    Ok(())
}

// =============================================================================
// Perf context (thread-local, like the engine's)
// =============================================================================

#[derive(Default)]
struct PerfContext {
    enabled: bool,
    get_from_memtable_count: u64,
    get_from_memtable_time: u64,
    get_from_table_nanos: u64,
    seek_on_memtable_time: u64,
    seek_child_seek_count: u64,
}

thread_local! {
    static PERF: RefCell<PerfContext> = RefCell::new(PerfContext::default());
}

fn perf_enabled() -> bool {
    PERF.with(|p| p.borrow().enabled)
}

fn perf_record(f: impl FnOnce(&mut PerfContext)) {
    PERF.with(|p| {
        let mut p = p.borrow_mut();
        if p.enabled {
            f(&mut p);
        }
    });
}

// =============================================================================
// SimStore
// =============================================================================

#[derive(Default)]
struct Counters {
    keys_written: AtomicU64,
    keys_read: AtomicU64,
    keys_found: AtomicU64,
    keys_deleted: AtomicU64,
    seeks: AtomicU64,
    bytes_written: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
    ingests: AtomicU64,
}

struct Shared {
    tree: Mutex<Tree>,
    work: Condvar,
    observers: Mutex<Vec<CompactionObserver>>,
    options: SimOptions,
    counters: Counters,
}

impl Shared {
    /// Append to the memtable, freezing it into level 0 when full.
    fn apply<'a>(&self, entries: impl IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>) {
        let mut tree = self.tree.lock();
        let mut bytes = 0u64;
        for (key, value) in entries {
            bytes += (key.len() + value.map_or(0, |v| v.len())) as u64;
            tree.last_seq += 1;
            tree.memtable.insert(key, tree.last_seq, value);
        }
        tree.memtable_bytes += bytes;
        self.counters
            .bytes_written
            .fetch_add(bytes, Ordering::Relaxed);
        if tree.memtable_bytes >= self.options.write_buffer_size && tree.freeze_memtable() {
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
            self.work.notify_all();
        }
    }
}

fn compaction_worker(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut tree = shared.tree.lock();
            loop {
                if tree.shutdown {
                    return;
                }
                if let Some(job) = tree.pick_compaction(&shared.options) {
                    tree.running += 1;
                    break job;
                }
                shared.work.wait(&mut tree);
            }
        };

        if !shared.options.compaction_delay.is_zero() {
            std::thread::sleep(shared.options.compaction_delay);
        }
        let merged = merge_runs(&job.inputs, job.bottommost);
        tracing::debug!(
            target_level = job.target_level,
            inputs = job.inputs.len(),
            entries = merged.len(),
            "sim compaction finished"
        );

        {
            let mut tree = shared.tree.lock();
            tree.install(job, merged);
            tree.running -= 1;
        }
        shared.counters.compactions.fetch_add(1, Ordering::Relaxed);

        let observers = shared.observers.lock().clone();
        for observer in observers {
            observer();
        }
    }
}

/// In-process reference engine. Data persists across reopen through a JSON
/// manifest written on [`Store::close`].
pub struct SimStore {
    shared: Arc<Shared>,
    dir: PathBuf,
    worker: Option<JoinHandle<()>>,
}

impl SimStore {
    pub fn open_with(path: &Path, options: SimOptions) -> Result<Self, StoreError> {
        if options.num_levels < 2 || options.level0_compaction_trigger == 0 {
            return Err(StoreError::Engine(
                "sim store needs at least two levels and a non-zero level-0 trigger".into(),
            ));
        }
        fs::create_dir_all(path)?;
        let tree = load_manifest(path, options.num_levels)?;
        let shared = Arc::new(Shared {
            tree: Mutex::new(tree),
            work: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            options,
            counters: Counters::default(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("sim-compaction".into())
                .spawn(move || compaction_worker(shared))?
        };
        Ok(Self {
            shared,
            dir: path.to_path_buf(),
            worker: Some(worker),
        })
    }

    pub fn options(&self) -> &SimOptions {
        &self.shared.options
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.shared.tree.lock().shutdown = true;
            self.shared.work.notify_all();
            if worker.join().is_err() {
                tracing::error!("sim compaction thread panicked");
            }
        }
    }

    fn statistics_dump(&self) -> String {
        let c = &self.shared.counters;
        let rows = [
            ("sim.number.keys.written", &c.keys_written),
            ("sim.number.keys.read", &c.keys_read),
            ("sim.number.keys.found", &c.keys_found),
            ("sim.number.keys.deleted", &c.keys_deleted),
            ("sim.number.db.seek", &c.seeks),
            ("sim.bytes.written", &c.bytes_written),
            ("sim.flush.count", &c.flushes),
            ("sim.compaction.count", &c.compactions),
            ("sim.ingest.count", &c.ingests),
        ];
        rows.iter()
            .map(|(name, v)| format!("{} COUNT : {}\n", name, v.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Drop for SimStore {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl Store for SimStore {
    type Cursor<'a> = SimCursor<'a>;
    type FileWriter<'a> = SimFileWriter;

    const NAME: &'static str = "sim";

    fn open(path: &Path, config: &ExperimentConfig) -> Result<Self, StoreError> {
        Self::open_with(path, SimOptions::from_config(config))
    }

    fn destroy(path: &Path) -> Result<(), StoreError> {
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.shared.apply([(key, Some(value))]);
        self.shared
            .counters
            .keys_written
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.shared.apply([(key, None)]);
        self.shared
            .counters
            .keys_deleted
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let timed = perf_enabled();
        self.shared.counters.keys_read.fetch_add(1, Ordering::Relaxed);
        let tree = self.shared.tree.lock();

        let start = timed.then(Instant::now);
        let in_memtable = tree.memtable.get(key, u64::MAX);
        if let Some(start) = start {
            let nanos = start.elapsed().as_nanos() as u64;
            perf_record(|p| {
                p.get_from_memtable_count += 1;
                p.get_from_memtable_time += nanos;
            });
        }

        let found = match in_memtable {
            Some(hit) => hit,
            None => {
                let start = timed.then(Instant::now);
                let hit = tree.lookup(key).flatten();
                if let Some(start) = start {
                    let nanos = start.elapsed().as_nanos() as u64;
                    perf_record(|p| p.get_from_table_nanos += nanos);
                }
                hit
            }
        };
        if found.is_some() {
            self.shared.counters.keys_found.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    fn new_cursor(&self) -> Result<SimCursor<'_>, StoreError> {
        let snapshot = self.shared.tree.lock().snapshot();
        Ok(SimCursor {
            store: self,
            snapshot,
            current: None,
        })
    }

    fn sorted_file_writer(&self, path: &Path) -> Result<SimFileWriter, StoreError> {
        Ok(SimFileWriter {
            writer: BufWriter::new(File::create(path)?),
            last_key: None,
            count: 0,
        })
    }

    fn ingest_sorted_file(&self, path: &Path) -> Result<(), StoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut run = BTreeMap::new();
        let mut last: Option<Vec<u8>> = None;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let (key, value): (Vec<u8>, Vec<u8>) = serde_json::from_str(&line).map_err(|e| {
                StoreError::IngestRejected(format!("{} entry {}: {}", path.display(), i, e))
            })?;
            if let Some(prev) = &last {
                if key <= *prev {
                    return Err(StoreError::IngestRejected(format!(
                        "{}: key {:?} out of order",
                        path.display(),
                        lossy(&key)
                    )));
                }
            }
            last = Some(key.clone());
            run.insert(key, Some(value));
        }
        let (Some(first), Some(last)) = (run.keys().next().cloned(), last) else {
            return Err(StoreError::IngestRejected(format!(
                "{}: no entries",
                path.display()
            )));
        };

        let mut tree = self.shared.tree.lock();
        let overlaps_memtable = tree
            .memtable
            .next_key(Bound::Included(&first[..]), u64::MAX)
            .is_some_and(|key| key <= last);
        if overlaps_memtable && tree.freeze_memtable() {
            self.shared.counters.flushes.fetch_add(1, Ordering::Relaxed);
        }
        tree.level0.push(Arc::new(run));
        self.shared.counters.ingests.fetch_add(1, Ordering::Relaxed);
        self.shared.work.notify_all();
        Ok(())
    }

    fn write_batch(
        &self,
        batch: &[(Vec<u8>, Vec<u8>)],
        _durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.shared
            .apply(batch.iter().map(|(k, v)| (&k[..], Some(&v[..]))));
        self.shared
            .counters
            .keys_written
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn register_compaction_observer(&self, observer: CompactionObserver) {
        self.shared.observers.lock().push(observer);
    }

    fn int_property(&self, property: IntProperty) -> Result<u64, StoreError> {
        let tree = self.shared.tree.lock();
        let opts = &self.shared.options;
        Ok(match property {
            IntProperty::RunningCompactions => tree.running,
            IntProperty::PendingCompactionBytes => tree.pending_compaction_bytes(opts),
            IntProperty::PendingCompactionCount => tree.pick_compaction(opts).is_some() as u64,
        })
    }

    fn flush_live_files(&self) -> Result<(), StoreError> {
        let mut tree = self.shared.tree.lock();
        if tree.freeze_memtable() {
            self.shared.counters.flushes.fetch_add(1, Ordering::Relaxed);
            self.shared.work.notify_all();
        }
        Ok(())
    }

    fn level_summary(&self) -> Result<Vec<LevelSummary>, StoreError> {
        let tree = self.shared.tree.lock();
        let describe = |level: usize, runs: &[&Run]| LevelSummary {
            level,
            files: runs.len(),
            entries: runs.iter().map(|r| r.len() as u64).sum(),
            deletions: runs
                .iter()
                .map(|r| r.values().filter(|v| v.is_none()).count() as u64)
                .sum(),
            bytes: runs.iter().map(|r| run_bytes(r)).sum(),
        };
        let level0: Vec<&Run> = tree.level0.iter().collect();
        let mut summary = vec![describe(0, &level0)];
        for (level, run) in tree.levels.iter().enumerate().skip(1) {
            let runs: Vec<&Run> = run.iter().collect();
            summary.push(describe(level, &runs));
        }
        Ok(summary)
    }

    fn close(mut self) -> Result<Option<String>, StoreError> {
        self.stop_worker();
        {
            let mut tree = self.shared.tree.lock();
            tree.freeze_memtable();
            save_manifest(&self.dir, &tree)?;
        }
        Ok(Some(self.statistics_dump()))
    }

    fn enable_perf_context() {
        PERF.with(|p| {
            *p.borrow_mut() = PerfContext {
                enabled: true,
                ..Default::default()
            }
        });
    }

    fn take_perf_context() -> Option<String> {
        PERF.with(|p| {
            let mut p = p.borrow_mut();
            p.enabled = false;
            Some(format!(
                "get_from_memtable_count = {}, get_from_memtable_time = {}, \
                 get_from_table_nanos = {}, seek_on_memtable_time = {}, \
                 seek_child_seek_count = {}",
                p.get_from_memtable_count,
                p.get_from_memtable_time,
                p.get_from_table_nanos,
                p.seek_on_memtable_time,
                p.seek_child_seek_count,
            ))
        })
    }
}

// =============================================================================
// Cursor
// =============================================================================

pub struct SimCursor<'a> {
    store: &'a SimStore,
    snapshot: Snapshot,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl StoreCursor for SimCursor<'_> {
    fn refresh(&mut self) -> Result<(), StoreError> {
        self.snapshot = self.store.shared.tree.lock().snapshot();
        self.current = None;
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) {
        self.store.shared.counters.seeks.fetch_add(1, Ordering::Relaxed);
        let start = perf_enabled().then(Instant::now);
        self.current = self.snapshot.next_visible(Bound::Included(key));
        if let Some(start) = start {
            let nanos = start.elapsed().as_nanos() as u64;
            let children = self.snapshot.runs.len() as u64 + 1;
            perf_record(|p| {
                p.seek_on_memtable_time += nanos;
                p.seek_child_seek_count += children;
            });
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| &k[..])
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| &v[..])
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.current = self.snapshot.next_visible(Bound::Excluded(&key[..]));
        }
    }

    fn status(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// Sorted file writer
// =============================================================================

/// JSON-lines sorted file consumed by [`SimStore::ingest_sorted_file`].
pub struct SimFileWriter {
    writer: BufWriter<File>,
    last_key: Option<Vec<u8>>,
    count: u64,
}

impl SortedFileWriter for SimFileWriter {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if let Some(prev) = &self.last_key {
            if key <= &prev[..] {
                return Err(StoreError::OutOfOrder {
                    previous: lossy(prev),
                    key: lossy(key),
                });
            }
        }
        serde_json::to_writer(&mut self.writer, &(key, value))
            .map_err(|e| StoreError::Engine(format!("sorted file encode failed: {}", e)))?;
        self.writer.write_all(b"\n")?;
        self.last_key = Some(key.to_vec());
        self.count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<u64, StoreError> {
        if self.count == 0 {
            return Err(StoreError::EmptyFile);
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.count)
    }
}
