//! Shared benchmark harness for the workload replayer.
//!
//! Provides store factory, trace generators, latency percentile reporting,
//! and configuration types used across the benchmark files.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lsm_benchmarks::latency::fmt_duration;
use lsm_benchmarks::store::{SimOptions, SimStore};
use tempfile::TempDir;

// =============================================================================
// Constants
// =============================================================================

/// Number of entries to pre-populate for read benchmarks.
pub const WARMUP_COUNT: u64 = 10_000;

/// Number of samples for percentile measurement.
pub const PERCENTILE_SAMPLES: usize = 1_000;

// =============================================================================
// Hardware Info
// =============================================================================

static HARDWARE_INFO_ONCE: std::sync::Once = std::sync::Once::new();

/// Print hardware specs once per benchmark binary.
pub fn print_hardware_info() {
    HARDWARE_INFO_ONCE.call_once(|| {
        let cpu = read_cpu_model();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(0);
        let ram_gb = read_total_ram_gb();
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        eprintln!("=== Hardware ===");
        eprintln!("CPU:    {}", cpu);
        eprintln!("Cores:  {}", cores);
        eprintln!("RAM:    {} GB", ram_gb);
        eprintln!("OS:     {} ({})", os, arch);
        eprintln!("================");
    });
}

fn read_cpu_model() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/cpuinfo") {
            for line in contents.lines() {
                if line.starts_with("model name") {
                    if let Some(val) = line.split(':').nth(1) {
                        return val.trim().to_string();
                    }
                }
            }
        }
    }
    "unknown".to_string()
}

fn read_total_ram_gb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/meminfo") {
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    if let Some(kb) = rest.split_whitespace().next() {
                        if let Ok(kb) = kb.parse::<u64>() {
                            return kb / 1_048_576;
                        }
                    }
                }
            }
        }
    }
    0
}

// =============================================================================
// Latency Percentiles
// =============================================================================

/// Collected latency percentiles.
pub struct Percentiles {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub samples: usize,
}

/// Run `f` for `n` iterations, time each call individually, return percentiles.
pub fn measure_percentiles<F: FnMut()>(n: usize, mut f: F) -> Percentiles {
    let mut timings = Vec::with_capacity(n);
    for _ in 0..n {
        let start = Instant::now();
        f();
        timings.push(start.elapsed());
    }
    timings.sort();
    let len = timings.len();
    Percentiles {
        p50: timings[len * 50 / 100],
        p95: timings[len * 95 / 100],
        p99: timings[len * 99 / 100],
        min: timings[0],
        max: timings[len - 1],
        samples: len,
    }
}

/// Print percentiles to stderr in a compact table.
pub fn report_percentiles(label: &str, p: &Percentiles) {
    eprintln!(
        "  {:<45} p50={:<12} p95={:<12} p99={:<12} (n={})",
        label,
        fmt_duration(p.p50),
        fmt_duration(p.p95),
        fmt_duration(p.p99),
        p.samples,
    );
}

// =============================================================================
// Buffer sizing
// =============================================================================

/// Write-buffer size for the in-process engine.
#[derive(Debug, Clone, Copy)]
pub enum BufferConfig {
    /// 64 KB: frequent flushes and compactions
    Small,
    /// 4 MB: mostly memtable-resident at bench sizes
    Large,
}

impl BufferConfig {
    pub const ALL: [Self; 2] = [Self::Small, Self::Large];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Small => "64KB",
            Self::Large => "4MB",
        }
    }

    pub fn options(&self) -> SimOptions {
        let write_buffer_size = match self {
            Self::Small => 64 << 10,
            Self::Large => 4 << 20,
        };
        SimOptions {
            write_buffer_size,
            level_base_bytes: write_buffer_size * 4,
            ..SimOptions::default()
        }
    }
}

impl fmt::Display for BufferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// BenchStore
// =============================================================================

/// Store wrapper that keeps its temp directory alive.
pub struct BenchStore {
    pub store: SimStore,
    pub dir: TempDir,
}

/// Open a fresh in-process store in a temp directory.
pub fn create_store(config: BufferConfig) -> BenchStore {
    print_hardware_info();
    let dir = TempDir::new().expect("failed to create temp dir");
    let store =
        SimStore::open_with(&dir.path().join("db"), config.options()).expect("failed to open store");
    BenchStore { store, dir }
}

// =============================================================================
// Data Generators
// =============================================================================

/// Fixed-width key from a counter, so lexical order is numeric order.
pub fn key(i: u64) -> String {
    format!("key{:012}", i)
}

/// Deterministic value of `len` bytes (no whitespace).
pub fn value(i: u64, len: usize) -> String {
    let digits = format!("{:016x}", i.wrapping_mul(0x9E3779B97F4A7C15));
    digits.chars().cycle().take(len).collect()
}

/// Simple LCG so generated traces are reproducible without a rand dependency.
pub struct KeyGen {
    state: u64,
}

impl KeyGen {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0xdeadbeef),
        }
    }

    pub fn next_below(&mut self, bound: u64) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 33) % bound.max(1)
    }
}

/// Operation mix of a generated workload, in percent.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadMix {
    pub updates: u64,
    pub deletes: u64,
    pub queries: u64,
    pub scans: u64,
}

impl WorkloadMix {
    pub const READ_HEAVY: Self = Self {
        updates: 10,
        deletes: 0,
        queries: 85,
        scans: 5,
    };
    pub const WRITE_HEAVY: Self = Self {
        updates: 70,
        deletes: 10,
        queries: 15,
        scans: 5,
    };
}

/// Write `count` shuffled insert records of `value_len` bytes.
pub fn write_insert_trace(dir: &Path, count: u64, value_len: usize) -> PathBuf {
    let mut ids: Vec<u64> = (0..count).collect();
    let mut rng = KeyGen::new(count);
    for i in (1..ids.len()).rev() {
        let j = rng.next_below(i as u64 + 1) as usize;
        ids.swap(i, j);
    }
    let path = dir.join(format!("load_{}.txt", count));
    let mut out = BufWriter::new(std::fs::File::create(&path).expect("create trace"));
    for id in ids {
        writeln!(out, "I {} {}", key(id), value(id, value_len)).expect("write trace");
    }
    out.flush().expect("flush trace");
    path
}

/// Write a `count`-line workload over a key space of `key_space` keys.
pub fn write_workload_trace(
    dir: &Path,
    count: u64,
    key_space: u64,
    mix: WorkloadMix,
    seed: u64,
) -> PathBuf {
    let mut rng = KeyGen::new(seed);
    let path = dir.join(format!("workload_{}_{}.txt", count, seed));
    let mut out = BufWriter::new(std::fs::File::create(&path).expect("create trace"));
    for i in 0..count {
        let k = rng.next_below(key_space);
        let roll = rng.next_below(100);
        let line = if roll < mix.updates {
            format!("U {} {}", key(k), value(i, 64))
        } else if roll < mix.updates + mix.deletes {
            format!("D {}", key(k))
        } else if roll < mix.updates + mix.deletes + mix.queries {
            format!("Q {}", key(k))
        } else {
            format!("S {} {}", key(k), key(k + 100))
        };
        writeln!(out, "{}", line).expect("write trace");
    }
    out.flush().expect("flush trace");
    path
}
