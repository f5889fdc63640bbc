//! RocksDB adapter.
//!
//! The crate has no event-listener binding, so compaction completion is
//! observed by a monitor thread that polls `rocksdb.num-running-compactions`
//! and fires observers whenever the count drops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rocksdb::perf::{set_perf_stats, PerfContext, PerfStatsLevel};
use rocksdb::{
    BlockBasedOptions, Cache, DBCompactionStyle, DBCompressionType, DBRawIterator,
    IngestExternalFileOptions, Options, SstFileWriter, WriteBatch, WriteOptions, DB,
};

use super::{
    CompactionObserver, IntProperty, LevelSummary, SortedFileWriter, Store, StoreCursor,
    WriteDurability,
};
use crate::config::{CompactionPri, CompactionStyle, ExperimentConfig, FilterType};
use crate::error::StoreError;

const MONITOR_INTERVAL: Duration = Duration::from_millis(50);
const NUM_LEVELS: usize = 7;

fn compaction_pri_option(pri: CompactionPri) -> &'static str {
    match pri {
        CompactionPri::ByCompensatedSize => "kByCompensatedSize",
        CompactionPri::OldestLargestSeqFirst => "kOldestLargestSeqFirst",
        CompactionPri::OldestSmallestSeqFirst => "kOldestSmallestSeqFirst",
        CompactionPri::MinOverlappingRatio => "kMinOverlappingRatio",
    }
}

/// `block_based_table_factory` value setting a single table option.
fn table_option(name: &str, value: bool) -> String {
    format!("{{{}={}}}", name, value)
}

fn build_options(config: &ExperimentConfig) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.enable_statistics();
    opts.set_num_levels(NUM_LEVELS as i32);

    opts.set_compaction_style(match config.compaction_style {
        CompactionStyle::Level => DBCompactionStyle::Level,
        CompactionStyle::Universal => DBCompactionStyle::Universal,
        CompactionStyle::Fifo => DBCompactionStyle::Fifo,
    });
    opts.set_write_buffer_size(config.buffer_size() as usize);
    opts.set_target_file_size_base(config.target_file_size_base());
    opts.set_max_bytes_for_level_base(config.max_bytes_for_level_base());
    opts.set_max_bytes_for_level_multiplier(config.size_ratio as f64);
    opts.set_level_zero_file_num_compaction_trigger(config.level0_file_num_compaction_trigger as i32);
    opts.set_level_zero_slowdown_writes_trigger(config.level0_slowdown_writes_trigger as i32);
    opts.set_level_zero_stop_writes_trigger(config.level0_stop_writes_trigger as i32);
    opts.set_compression_type(if config.compression {
        DBCompressionType::Snappy
    } else {
        DBCompressionType::None
    });
    opts.set_use_direct_reads(config.direct_io);
    opts.set_use_direct_io_for_flush_and_compaction(config.direct_io);
    opts.set_memtable_whole_key_filtering(true);
    opts.set_optimize_filters_for_hits(false);

    let mut table = BlockBasedOptions::default();
    if config.bits_per_key > 0.0 {
        match config.filter_type {
            FilterType::Bloom => table.set_bloom_filter(config.bits_per_key, false),
            FilterType::Ribbon => {
                table.set_hybrid_ribbon_filter(config.bits_per_key, config.bloom_before_level)
            }
        }
    }
    if config.block_cache_mb > 0 {
        let cache = Cache::new_lru_cache((config.block_cache_mb as usize) << 20);
        table.set_block_cache(&cache);
    } else {
        table.disable_cache();
    }
    table.set_cache_index_and_filter_blocks(config.cache_index_and_filter_blocks);
    table.set_pin_l0_filter_and_index_blocks_in_cache(
        config.pin_l0_filter_and_index_blocks_in_cache,
    );
    table.set_pin_top_level_index_and_filter(config.pin_top_level_index_and_filter);
    opts.set_block_based_table_factory(&table);
    opts
}

// =============================================================================
// Compaction monitor
// =============================================================================

#[derive(Default)]
struct MonitorShared {
    observers: Mutex<Vec<CompactionObserver>>,
    stop: Mutex<bool>,
    wake: Condvar,
}

struct Monitor {
    shared: Arc<MonitorShared>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    fn spawn(db: Arc<DB>) -> Result<Self, StoreError> {
        let shared = Arc::new(MonitorShared::default());
        let handle = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("rocksdb-compaction-monitor".into())
                .spawn(move || monitor_loop(db, shared))?
        };
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("compaction monitor thread panicked");
            }
        }
    }
}

fn monitor_loop(db: Arc<DB>, shared: Arc<MonitorShared>) {
    let mut previous = 0u64;
    loop {
        {
            let mut stop = shared.stop.lock();
            if *stop {
                return;
            }
            let _ = shared.wake.wait_for(&mut stop, MONITOR_INTERVAL);
            if *stop {
                return;
            }
        }
        let running = match db.property_int_value(IntProperty::RunningCompactions.name()) {
            Ok(Some(n)) => n,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "compaction monitor failed to read property");
                continue;
            }
        };
        if running < previous {
            let observers = shared.observers.lock().clone();
            for _ in running..previous {
                for observer in &observers {
                    observer();
                }
            }
        }
        previous = running;
    }
}

// =============================================================================
// RocksStore
// =============================================================================

pub struct RocksStore {
    // Field order matters: the monitor holds a handle to the DB and must stop
    // before the last reference is released.
    monitor: Monitor,
    db: Arc<DB>,
    opts: Options,
    path: PathBuf,
}

impl Store for RocksStore {
    type Cursor<'a> = RocksCursor<'a>;
    type FileWriter<'a> = RocksFileWriter<'a>;

    const NAME: &'static str = "rocksdb";

    fn open(path: &Path, config: &ExperimentConfig) -> Result<Self, StoreError> {
        let opts = build_options(config);
        let db = Arc::new(DB::open(&opts, path)?);
        let pri = compaction_pri_option(config.compaction_pri);
        if let Err(e) = db.set_options(&[("compaction_pri", pri)]) {
            tracing::warn!(compaction_pri = pri, error = %e, "compaction priority not applied");
        }
        // The block-based table builder has no setter for this one.
        let high_pri = table_option(
            "cache_index_and_filter_blocks_with_high_priority",
            config.cache_index_and_filter_blocks_with_high_priority,
        );
        if let Err(e) = db.set_options(&[("block_based_table_factory", high_pri.as_str())]) {
            tracing::warn!(option = %high_pri, error = %e, "table option not applied");
        }
        let monitor = Monitor::spawn(Arc::clone(&db))?;
        tracing::debug!(path = %path.display(), "rocksdb opened");
        Ok(Self {
            monitor,
            db,
            opts,
            path: path.to_path_buf(),
        })
    }

    fn destroy(path: &Path) -> Result<(), StoreError> {
        DB::destroy(&Options::default(), path)?;
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.delete(key)?)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    fn new_cursor(&self) -> Result<RocksCursor<'_>, StoreError> {
        Ok(RocksCursor {
            db: &self.db,
            iter: self.db.raw_iterator(),
        })
    }

    fn sorted_file_writer(&self, path: &Path) -> Result<RocksFileWriter<'_>, StoreError> {
        let writer = SstFileWriter::create(&self.opts);
        writer.open(path)?;
        Ok(RocksFileWriter {
            writer,
            last_key: None,
            count: 0,
        })
    }

    fn ingest_sorted_file(&self, path: &Path) -> Result<(), StoreError> {
        let mut ingest = IngestExternalFileOptions::default();
        ingest.set_move_files(true);
        self.db
            .ingest_external_file_opts(&ingest, vec![path])
            .map_err(|e| StoreError::IngestRejected(e.into_string()))
    }

    fn write_batch(
        &self,
        batch: &[(Vec<u8>, Vec<u8>)],
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        let mut wb = WriteBatch::default();
        for (key, value) in batch {
            wb.put(key, value);
        }
        let mut wo = WriteOptions::default();
        wo.set_sync(durability.sync);
        wo.disable_wal(durability.disable_wal);
        Ok(self.db.write_opt(wb, &wo)?)
    }

    fn register_compaction_observer(&self, observer: CompactionObserver) {
        self.monitor.shared.observers.lock().push(observer);
    }

    fn int_property(&self, property: IntProperty) -> Result<u64, StoreError> {
        self.db
            .property_int_value(property.name())?
            .ok_or_else(|| StoreError::Engine(format!("property {} unavailable", property.name())))
    }

    fn flush_live_files(&self) -> Result<(), StoreError> {
        Ok(self.db.flush()?)
    }

    fn level_summary(&self) -> Result<Vec<LevelSummary>, StoreError> {
        let mut levels: Vec<LevelSummary> = (0..NUM_LEVELS)
            .map(|level| LevelSummary {
                level,
                ..Default::default()
            })
            .collect();
        for file in self.db.live_files()? {
            let level = file.level.max(0) as usize;
            if level >= levels.len() {
                levels.resize_with(level + 1, Default::default);
                levels[level].level = level;
            }
            let summary = &mut levels[level];
            summary.files += 1;
            summary.entries += file.num_entries;
            summary.deletions += file.num_deletions;
            summary.bytes += file.size as u64;
        }
        Ok(levels)
    }

    fn close(self) -> Result<Option<String>, StoreError> {
        let Self {
            monitor,
            db,
            opts,
            path,
        } = self;
        drop(monitor);
        if let Err(e) = db.flush_wal(true) {
            tracing::warn!(error = %e, "wal sync on close failed");
        }
        drop(db);
        tracing::debug!(path = %path.display(), "rocksdb closed");
        Ok(opts.get_statistics())
    }

    fn enable_perf_context() {
        set_perf_stats(PerfStatsLevel::EnableTimeExceptForMutex);
        PerfContext::default().reset();
    }

    fn take_perf_context() -> Option<String> {
        let report = PerfContext::default().report(true);
        set_perf_stats(PerfStatsLevel::Disable);
        Some(report)
    }
}

// =============================================================================
// Cursor and sorted file writer
// =============================================================================

pub struct RocksCursor<'a> {
    db: &'a DB,
    iter: DBRawIterator<'a>,
}

impl StoreCursor for RocksCursor<'_> {
    fn refresh(&mut self) -> Result<(), StoreError> {
        self.iter = self.db.raw_iterator();
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) {
        self.iter.seek(key);
    }

    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn key(&self) -> Option<&[u8]> {
        self.iter.key()
    }

    fn value(&self) -> Option<&[u8]> {
        self.iter.value()
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn status(&self) -> Result<(), StoreError> {
        Ok(self.iter.status()?)
    }
}

pub struct RocksFileWriter<'a> {
    writer: SstFileWriter<'a>,
    last_key: Option<Vec<u8>>,
    count: u64,
}

impl SortedFileWriter for RocksFileWriter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if let Some(prev) = &self.last_key {
            if key <= &prev[..] {
                return Err(StoreError::OutOfOrder {
                    previous: String::from_utf8_lossy(prev).into_owned(),
                    key: String::from_utf8_lossy(key).into_owned(),
                });
            }
        }
        self.writer.put(key, value)?;
        self.last_key = Some(key.to_vec());
        self.count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<u64, StoreError> {
        if self.count == 0 {
            return Err(StoreError::EmptyFile);
        }
        self.writer.finish()?;
        Ok(self.count)
    }
}
