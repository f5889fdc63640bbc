//! Trace interpreter.
//!
//! Replays instructions one at a time, in trace order, against a store.
//! Failed operations are logged and counted; replay always runs to the end
//! of the trace.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::barrier::{BarrierOutcome, CompactionBarrier};
use crate::error::{StoreError, TraceError};
use crate::latency::{LatencySummary, ReservoirSampler};
use crate::store::{Store, StoreCursor};
use crate::trace::Instruction;

/// Counters accumulated during one replay.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    /// Instructions dispatched to the store, failed ones included.
    pub instruction_count: u64,
    pub write_count: u64,
    pub read_count: u64,
    pub range_count: u64,
    pub found_count: u64,
    pub not_found_count: u64,
    pub operation_errors: u64,
    pub parse_errors: u64,
    /// Entries visited by range scans.
    pub scanned_entries: u64,
    pub write_latency: Option<LatencySummary>,
    pub read_latency: Option<LatencySummary>,
    pub range_latency: Option<LatencySummary>,
}

#[derive(Default)]
struct Samplers {
    write: ReservoirSampler,
    read: ReservoirSampler,
    range: ReservoirSampler,
}

#[derive(Clone, Copy)]
enum OpClass {
    Write,
    Read,
    Range,
}

/// Replays a workload trace against one open store.
pub struct WorkloadExecutor<'s, S: Store + 's> {
    store: &'s S,
    cursor: S::Cursor<'s>,
    stats: RunStatistics,
    samplers: Samplers,
}

impl<'s, S: Store + 's> WorkloadExecutor<'s, S> {
    pub fn new(store: &'s S) -> Result<Self, StoreError> {
        Ok(Self {
            store,
            cursor: store.new_cursor()?,
            stats: RunStatistics::default(),
            samplers: Samplers::default(),
        })
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// Dispatch one instruction.
    pub fn execute(&mut self, instruction: &Instruction) {
        self.stats.instruction_count += 1;
        let start = Instant::now();
        let (class, result) = match instruction {
            Instruction::Insert { key, value } | Instruction::Update { key, value } => {
                (OpClass::Write, self.store.put(key, value))
            }
            Instruction::Delete { key } => (OpClass::Write, self.store.delete(key)),
            Instruction::Query { key } => (OpClass::Read, self.query(key)),
            Instruction::ScanRange { start, end } => (OpClass::Range, self.scan(start, end)),
        };
        self.record(class, start.elapsed());

        if let Err(e) = result {
            self.stats.operation_errors += 1;
            tracing::warn!(
                instruction = %instruction,
                error = %e,
                "operation failed"
            );
        }
    }

    fn record(&mut self, class: OpClass, elapsed: Duration) {
        match class {
            OpClass::Write => {
                self.stats.write_count += 1;
                self.samplers.write.record(elapsed);
            }
            OpClass::Read => {
                self.stats.read_count += 1;
                self.samplers.read.record(elapsed);
            }
            OpClass::Range => {
                self.stats.range_count += 1;
                self.samplers.range.record(elapsed);
            }
        }
    }

    fn query(&mut self, key: &[u8]) -> Result<(), StoreError> {
        match self.store.get(key)? {
            Some(_) => self.stats.found_count += 1,
            None => self.stats.not_found_count += 1,
        }
        Ok(())
    }

    /// Visit `[start, end)` on a cursor refreshed to the latest committed
    /// state, so the scan observes every earlier write in the trace.
    fn scan(&mut self, start: &[u8], end: &[u8]) -> Result<(), StoreError> {
        self.cursor.refresh()?;
        self.cursor.seek(start);
        while self.cursor.valid() {
            match self.cursor.key() {
                Some(key) if key < end => {}
                _ => break,
            }
            self.stats.scanned_entries += 1;
            self.cursor.next();
        }
        self.cursor.status()
    }

    /// Replay a whole trace. Malformed lines are logged and skipped; only a
    /// failure to read the trace itself stops the replay.
    pub fn replay<I>(&mut self, trace: I) -> Result<(), std::io::Error>
    where
        I: IntoIterator<Item = Result<Instruction, TraceError>>,
    {
        for item in trace {
            match item {
                Ok(instruction) => self.execute(&instruction),
                Err(TraceError::Parse(e)) => {
                    self.stats.parse_errors += 1;
                    tracing::warn!(error = %e, "skipping malformed trace line");
                }
                Err(TraceError::Io(e)) => return Err(e),
            }
        }
        Ok(())
    }

    /// End of trace: flush live files, wait for background compaction to
    /// drain, and hand back the statistics.
    pub fn finish(
        mut self,
        barrier: &CompactionBarrier,
        poll_interval: Duration,
    ) -> Result<(RunStatistics, BarrierOutcome), StoreError> {
        self.store.flush_live_files()?;
        let outcome = barrier.wait_until_idle(self.store, poll_interval)?;
        self.stats.write_latency = self.samplers.write.summary();
        self.stats.read_latency = self.samplers.read.summary();
        self.stats.range_latency = self.samplers.range.summary();
        Ok((self.stats, outcome))
    }
}
