//! Per-operation latency sampling and display helpers.

use std::time::Duration;

use serde::Serialize;

/// Maximum latency samples kept per operation class.
pub const RESERVOIR_SIZE: usize = 10_000;

/// Reservoir sampler that keeps at most `RESERVOIR_SIZE` latencies.
///
/// Uses Algorithm R (Vitter, 1985) with an LCG; traces can be far longer
/// than the reservoir.
#[derive(Debug, Clone)]
pub struct ReservoirSampler {
    samples: Vec<Duration>,
    count: u64,
    max: Duration,
    rng_state: u64,
}

impl Default for ReservoirSampler {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl ReservoirSampler {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            samples: Vec::new(),
            count: 0,
            max: Duration::ZERO,
            rng_state: seed.wrapping_add(0xdeadbeef),
        }
    }

    #[inline]
    pub fn record(&mut self, d: Duration) {
        self.count += 1;
        self.max = self.max.max(d);
        if self.samples.len() < RESERVOIR_SIZE {
            self.samples.push(d);
        } else {
            let j = self.fast_rand() % self.count;
            if j < RESERVOIR_SIZE as u64 {
                self.samples[j as usize] = d;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Percentile summary of what has been recorded; `None` when empty.
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let len = sorted.len();
        Some(LatencySummary {
            count: self.count,
            p50: sorted[len * 50 / 100],
            p95: sorted[(len * 95 / 100).min(len - 1)],
            p99: sorted[(len * 99 / 100).min(len - 1)],
            max: self.max,
        })
    }

    #[inline]
    fn fast_rand(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.rng_state >> 33
    }
}

/// Latency percentiles for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    /// Operations recorded, not just sampled.
    pub count: u64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Format a Duration for human-readable latency display.
pub fn fmt_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{} ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2} µs", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2} ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2} s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Format a large number with comma separators.
pub fn fmt_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sampler_has_no_summary() {
        assert!(ReservoirSampler::default().summary().is_none());
    }

    #[test]
    fn percentiles_over_a_small_population() {
        let mut sampler = ReservoirSampler::default();
        for i in 1..=100u64 {
            sampler.record(Duration::from_micros(i));
        }
        let s = sampler.summary().unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.p50, Duration::from_micros(51));
        assert_eq!(s.p99, Duration::from_micros(100));
        assert_eq!(s.max, Duration::from_micros(100));
    }

    #[test]
    fn reservoir_is_bounded_but_counts_everything() {
        let mut sampler = ReservoirSampler::with_seed(7);
        for i in 0..(RESERVOIR_SIZE as u64 * 3) {
            sampler.record(Duration::from_nanos(i));
        }
        assert_eq!(sampler.count(), RESERVOIR_SIZE as u64 * 3);
        assert_eq!(sampler.samples.len(), RESERVOIR_SIZE);
        assert_eq!(
            sampler.summary().unwrap().max,
            Duration::from_nanos(RESERVOIR_SIZE as u64 * 3 - 1)
        );
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(fmt_num(1234567), "1,234,567");
        assert_eq!(fmt_num(12), "12");
        assert_eq!(fmt_duration(Duration::from_nanos(500)), "500 ns");
        assert_eq!(fmt_duration(Duration::from_micros(1500)), "1.50 ms");
    }
}
