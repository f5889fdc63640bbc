//! Experiment instrumentation and console rendering.
//!
//! Brackets a phase with process and energy snapshots, toggles the store's
//! per-thread perf context, and renders the tables printed after each phase.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::executor::RunStatistics;
use crate::latency::{fmt_duration, fmt_num, LatencySummary};
use crate::metrics::{
    delta_process_metrics, energy_delta_uj, read_energy_range_uj, read_energy_uj,
    snapshot_process_metrics, ProcessMetrics,
};
use crate::store::{LevelSummary, Store};

/// Perf-context counters summed into each category.
const CPU_KEYS: &[&str] = &[
    "get_from_memtable_time",
    "seek_on_memtable_time",
    "block_checksum_time",
    "block_decompress_time",
    "block_read_cpu_time",
];
const INDEX_KEYS: &[&str] = &["read_index_block_nanos"];
const FILTER_KEYS: &[&str] = &["read_filter_block_nanos"];
const DISK_KEYS: &[&str] = &["get_from_table_nanos"];

/// Active measurement window for one phase on the calling thread.
pub struct Instrumentation<S: Store> {
    started: Instant,
    process: ProcessMetrics,
    energy_uj: Option<u64>,
    perf: bool,
    _store: PhantomData<fn() -> S>,
}

impl<S: Store> Instrumentation<S> {
    pub fn begin(perf: bool) -> Self {
        if perf {
            S::enable_perf_context();
        }
        Self {
            started: Instant::now(),
            process: snapshot_process_metrics(),
            energy_uj: read_energy_uj(),
            perf,
            _store: PhantomData,
        }
    }

    pub fn finish(self) -> InstrumentationReport {
        let elapsed = self.started.elapsed();
        let process = delta_process_metrics(&self.process, &snapshot_process_metrics());
        let energy_uj = match (self.energy_uj, read_energy_uj()) {
            (Some(before), Some(after)) => {
                Some(energy_delta_uj(before, after, read_energy_range_uj()))
            }
            _ => None,
        };
        let perf_report = if self.perf { S::take_perf_context() } else { None };
        let breakdown = perf_report.as_deref().map(PerfBreakdown::from_report);
        InstrumentationReport {
            elapsed,
            process,
            energy_uj,
            perf_report,
            breakdown,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrumentationReport {
    pub elapsed: Duration,
    pub process: ProcessMetrics,
    /// Package energy; `None` without a readable RAPL counter.
    pub energy_uj: Option<u64>,
    pub perf_report: Option<String>,
    pub breakdown: Option<PerfBreakdown>,
}

/// Perf-context time split into the categories used for analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerfBreakdown {
    pub cpu_nanos: u64,
    pub index_io_nanos: u64,
    pub filter_io_nanos: u64,
    pub disk_io_nanos: u64,
    /// Every counter in the report, by name.
    pub counters: BTreeMap<String, u64>,
}

impl PerfBreakdown {
    /// Parse a `key = value, key = value` report. Entries that do not parse
    /// as unsigned integers are ignored.
    pub fn from_report(report: &str) -> Self {
        let counters: BTreeMap<String, u64> = report
            .split(',')
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                let value = value.trim().parse().ok()?;
                Some((key.trim().to_string(), value))
            })
            .collect();
        let sum = |keys: &[&str]| -> u64 { keys.iter().filter_map(|k| counters.get(*k)).sum() };
        Self {
            cpu_nanos: sum(CPU_KEYS),
            index_io_nanos: sum(INDEX_KEYS),
            filter_io_nanos: sum(FILTER_KEYS),
            disk_io_nanos: sum(DISK_KEYS),
            counters,
        }
    }

    pub fn total_nanos(&self) -> u64 {
        self.cpu_nanos + self.index_io_nanos + self.filter_io_nanos + self.disk_io_nanos
    }
}

/// Per-level element and byte counts, followed by the total.
pub fn render_lsm_layout(levels: &[LevelSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "LSM tree layout:");
    let mut total = 0u64;
    for level in levels.iter().filter(|l| l.files > 0) {
        let _ = writeln!(
            out,
            "  Level {}: {} elements, {} bytes ({} files, {} deletions)",
            level.level,
            fmt_num(level.entries),
            fmt_num(level.bytes),
            level.files,
            fmt_num(level.deletions),
        );
        total += level.entries;
    }
    let _ = writeln!(out, "  Total elements: {}", fmt_num(total));
    out
}

fn latency_row(out: &mut String, label: &str, summary: Option<&LatencySummary>) {
    let Some(s) = summary else {
        return;
    };
    let _ = writeln!(
        out,
        "  {:<6} {:>12} {:>12} {:>12} {:>12} {:>12}",
        label,
        fmt_num(s.count),
        fmt_duration(s.p50),
        fmt_duration(s.p95),
        fmt_duration(s.p99),
        fmt_duration(s.max),
    );
}

/// Operation counts and latency percentiles for one replay.
pub fn render_statistics(stats: &RunStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  instructions: {}  writes: {}  reads: {} (found {}, not found {})  ranges: {} ({} entries)",
        fmt_num(stats.instruction_count),
        fmt_num(stats.write_count),
        fmt_num(stats.read_count),
        fmt_num(stats.found_count),
        fmt_num(stats.not_found_count),
        fmt_num(stats.range_count),
        fmt_num(stats.scanned_entries),
    );
    if stats.operation_errors > 0 || stats.parse_errors > 0 {
        let _ = writeln!(
            out,
            "  operation errors: {}  malformed lines: {}",
            fmt_num(stats.operation_errors),
            fmt_num(stats.parse_errors),
        );
    }
    if stats.write_latency.is_some() || stats.read_latency.is_some() || stats.range_latency.is_some()
    {
        let _ = writeln!(
            out,
            "  {:<6} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "op", "count", "p50", "p95", "p99", "max"
        );
        let _ = writeln!(out, "  {}", "-".repeat(72));
        latency_row(&mut out, "write", stats.write_latency.as_ref());
        latency_row(&mut out, "read", stats.read_latency.as_ref());
        latency_row(&mut out, "range", stats.range_latency.as_ref());
    }
    out
}

/// Resource usage, energy and perf breakdown for one phase.
pub fn render_instrumentation(report: &InstrumentationReport) -> String {
    let mut out = String::new();
    let p = &report.process;
    let _ = writeln!(
        out,
        "  elapsed: {}  cpu: {} ms user / {} ms sys  ctx: {} vol / {} invol",
        fmt_duration(report.elapsed),
        fmt_num(p.user_time_ms),
        fmt_num(p.system_time_ms),
        fmt_num(p.voluntary_ctx),
        fmt_num(p.involuntary_ctx),
    );
    let _ = writeln!(
        out,
        "  storage io: {} bytes read / {} bytes written",
        fmt_num(p.read_bytes),
        fmt_num(p.write_bytes),
    );
    match report.energy_uj {
        Some(uj) => {
            let _ = writeln!(out, "  energy: {:.3} J", uj as f64 / 1_000_000.0);
        }
        None => {
            let _ = writeln!(out, "  energy: n/a");
        }
    }
    if let Some(b) = &report.breakdown {
        let _ = writeln!(
            out,
            "  perf: cpu {}  index io {}  filter io {}  disk io {}",
            fmt_duration(Duration::from_nanos(b.cpu_nanos)),
            fmt_duration(Duration::from_nanos(b.index_io_nanos)),
            fmt_duration(Duration::from_nanos(b.filter_io_nanos)),
            fmt_duration(Duration::from_nanos(b.disk_io_nanos)),
        );
    }
    out
}

/// Cumulative engine statistics captured at close.
pub fn render_store_statistics(dump: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Store statistics:");
    match dump.map(str::trim_end).filter(|d| !d.is_empty()) {
        Some(dump) => {
            for line in dump.lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        None => {
            let _ = writeln!(out, "  n/a");
        }
    }
    out
}

/// Every perf-context counter, one per line.
pub fn render_perf_report(report: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Perf context:");
    for entry in report.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let _ = writeln!(out, "  {}", entry);
    }
    out
}
