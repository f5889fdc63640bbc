//! Process-level metrics collected from /proc and powercap (Linux).
//!
//! On other platforms, or when a counter is not readable, values are zero or
//! `None` (graceful fallback).

use serde::Serialize;

/// Snapshot of process-level metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessMetrics {
    /// User-mode CPU time in milliseconds (from /proc/self/stat field 14: utime)
    pub user_time_ms: u64,
    /// Kernel-mode CPU time in milliseconds (from /proc/self/stat field 15: stime)
    pub system_time_ms: u64,
    /// Voluntary context switches (from /proc/self/status)
    pub voluntary_ctx: u64,
    /// Involuntary context switches (from /proc/self/status)
    pub involuntary_ctx: u64,
    /// Bytes the process caused to be read from storage (/proc/self/io)
    pub read_bytes: u64,
    /// Bytes the process caused to be written to storage (/proc/self/io)
    pub write_bytes: u64,
}

/// Take a snapshot of current process metrics.
pub fn snapshot_process_metrics() -> ProcessMetrics {
    #[cfg(target_os = "linux")]
    {
        let (user_time_ms, system_time_ms) = read_proc_stat();
        let (voluntary_ctx, involuntary_ctx) = read_proc_status();
        let (read_bytes, write_bytes) = read_proc_io();
        ProcessMetrics {
            user_time_ms,
            system_time_ms,
            voluntary_ctx,
            involuntary_ctx,
            read_bytes,
            write_bytes,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        ProcessMetrics::default()
    }
}

/// Compute the delta between two snapshots.
pub fn delta_process_metrics(before: &ProcessMetrics, after: &ProcessMetrics) -> ProcessMetrics {
    ProcessMetrics {
        user_time_ms: after.user_time_ms.saturating_sub(before.user_time_ms),
        system_time_ms: after.system_time_ms.saturating_sub(before.system_time_ms),
        voluntary_ctx: after.voluntary_ctx.saturating_sub(before.voluntary_ctx),
        involuntary_ctx: after.involuntary_ctx.saturating_sub(before.involuntary_ctx),
        read_bytes: after.read_bytes.saturating_sub(before.read_bytes),
        write_bytes: after.write_bytes.saturating_sub(before.write_bytes),
    }
}

/// Cumulative package energy in microjoules from the first RAPL zone.
///
/// `None` when powercap is absent or not readable (unprivileged, VMs,
/// non-Intel hosts).
pub fn read_energy_uj() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/sys/class/powercap/intel-rapl:0/energy_uj")
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Energy consumed between two RAPL readings, handling one counter wrap.
pub fn energy_delta_uj(before: u64, after: u64, max_range_uj: Option<u64>) -> u64 {
    if after >= before {
        after - before
    } else {
        match max_range_uj {
            Some(range) => range.saturating_sub(before) + after,
            None => 0,
        }
    }
}

/// Wrap-around point of the RAPL energy counter.
pub fn read_energy_range_uj() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/sys/class/powercap/intel-rapl:0/max_energy_range_uj")
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Flush dirty pages and drop the OS page, dentry and inode caches so the
/// next phase starts cold. Needs root.
pub fn drop_page_cache() -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        extern "C" {
            fn sync();
        }
        // SAFETY: sync(2) takes no arguments and cannot fail.
        unsafe { sync() };
        std::fs::write("/proc/sys/vm/drop_caches", b"3")
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "page cache control is Linux-only",
        ))
    }
}

/// Parse /proc/self/stat for user and system CPU time.
///
/// Fields are space-separated. Field 14 (0-indexed 13) = utime, field 15 (0-indexed 14) = stime.
/// Values are in clock ticks; we convert to milliseconds using sysconf(_SC_CLK_TCK).
#[cfg(target_os = "linux")]
fn read_proc_stat() -> (u64, u64) {
    let Ok(contents) = std::fs::read_to_string("/proc/self/stat") else {
        return (0, 0);
    };

    // The comm field (field 2) is wrapped in parentheses and may contain spaces,
    // so we find the closing ')' and parse fields after it.
    let Some(close_paren) = contents.rfind(')') else {
        return (0, 0);
    };
    let rest = &contents[close_paren + 2..]; // skip ") "
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // After the comm field, field 3 (state) is fields[0], so utime is
    // fields[11] and stime is fields[12].
    if fields.len() < 13 {
        return (0, 0);
    }

    let utime: u64 = fields[11].parse().unwrap_or(0);
    let stime: u64 = fields[12].parse().unwrap_or(0);

    let ticks_per_sec = ticks_per_second();
    (utime * 1000 / ticks_per_sec, stime * 1000 / ticks_per_sec)
}

/// Get clock ticks per second via libc sysconf.
#[cfg(target_os = "linux")]
fn ticks_per_second() -> u64 {
    // SAFETY: sysconf(_SC_CLK_TCK) is always safe to call.
    let ticks = unsafe { libc_sysconf_clk_tck() };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

/// Call sysconf(_SC_CLK_TCK) without depending on the libc crate.
///
/// _SC_CLK_TCK = 2 on Linux (glibc and musl).
///
/// # Safety
///
/// Calls the C `sysconf` function with `_SC_CLK_TCK`, which is always safe.
#[cfg(target_os = "linux")]
unsafe fn libc_sysconf_clk_tck() -> i64 {
    const SC_CLK_TCK: i32 = 2;
    extern "C" {
        fn sysconf(name: i32) -> i64;
    }
    sysconf(SC_CLK_TCK)
}

/// Parse /proc/self/status for voluntary and involuntary context switches.
#[cfg(target_os = "linux")]
fn read_proc_status() -> (u64, u64) {
    let Ok(contents) = std::fs::read_to_string("/proc/self/status") else {
        return (0, 0);
    };

    let mut voluntary = 0u64;
    let mut involuntary = 0u64;

    for line in contents.lines() {
        if let Some(val) = line.strip_prefix("voluntary_ctxt_switches:") {
            voluntary = val.trim().parse().unwrap_or(0);
        } else if let Some(val) = line.strip_prefix("nonvoluntary_ctxt_switches:") {
            involuntary = val.trim().parse().unwrap_or(0);
        }
    }

    (voluntary, involuntary)
}

/// Parse /proc/self/io for storage-level read and write bytes.
#[cfg(target_os = "linux")]
fn read_proc_io() -> (u64, u64) {
    let Ok(contents) = std::fs::read_to_string("/proc/self/io") else {
        return (0, 0);
    };
    let mut read = 0u64;
    let mut write = 0u64;
    for line in contents.lines() {
        if let Some(val) = line.strip_prefix("read_bytes:") {
            read = val.trim().parse().unwrap_or(0);
        } else if let Some(val) = line.strip_prefix("write_bytes:") {
            write = val.trim().parse().unwrap_or(0);
        }
    }
    (read, write)
}
