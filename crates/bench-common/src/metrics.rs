//! Cycle-count statistics for repeated measurements.
//!
//! Provides a ring buffer of samples so that repeated runs can be summarised
//! (min / mean / percentiles / max) without growing memory during a sweep.

use crate::cycles::Elapsed;

/// Statistics over repeated cycle measurements.
#[derive(Debug)]
pub struct CycleStats {
    /// Ring buffer of elapsed cycle counts.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples held (saturates at buffer size).
    sample_count: usize,
    /// Total samples recorded.
    total: u64,
    /// Minimum observed cycles.
    min: u64,
    /// Maximum observed cycles.
    max: u64,
    /// Sum of all samples for mean calculation.
    sum: u128,
    /// Wrapped measurements that were rejected.
    wrapped_count: u64,
}

impl CycleStats {
    /// Create a collector retaining up to `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total: 0,
            min: u64::MAX,
            max: 0,
            sum: 0,
            wrapped_count: 0,
        }
    }

    /// Record one measurement. Wrapped measurements are counted but never
    /// enter the statistics.
    pub fn record(&mut self, elapsed: Elapsed) {
        match elapsed {
            Elapsed::Cycles(n) => self.record_cycles(n),
            Elapsed::Wrapped(_) => self.wrapped_count += 1,
        }
    }

    /// Record a plain cycle count.
    pub fn record_cycles(&mut self, cycles: u64) {
        self.samples[self.write_pos] = cycles;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total += 1;
        self.min = self.min.min(cycles);
        self.max = self.max.max(cycles);
        self.sum += u128::from(cycles);
    }

    /// Number of valid samples recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of wrapped measurements rejected.
    #[must_use]
    pub fn wrapped_count(&self) -> u64 {
        self.wrapped_count
    }

    /// Minimum observed cycles.
    #[must_use]
    pub fn min(&self) -> Option<u64> {
        (self.total > 0).then_some(self.min)
    }

    /// Maximum observed cycles.
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        (self.total > 0).then_some(self.max)
    }

    /// Mean cycles.
    #[must_use]
    pub fn mean(&self) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        u64::try_from(self.sum / u128::from(self.total)).ok()
    }

    /// Compute a percentile from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if percentile is
    /// outside `0.0..=100.0`.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        self.percentiles(&[percentile]).first().map(|&(_, v)| v)
    }

    /// Compute multiple percentiles with a single sort.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, u64)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|&&p| (0.0..=100.0).contains(&p))
            .map(|&p| {
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                (p, sorted[idx.min(sorted.len() - 1)])
            })
            .collect()
    }

    /// Get a snapshot of current statistics.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total,
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            median: self.percentile(50.0),
            wrapped_count: self.wrapped_count,
        }
    }
}

/// Immutable snapshot of statistics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    /// Valid samples recorded.
    pub total: u64,
    /// Minimum cycles.
    pub min: Option<u64>,
    /// Maximum cycles.
    pub max: Option<u64>,
    /// Mean cycles.
    pub mean: Option<u64>,
    /// Median cycles.
    pub median: Option<u64>,
    /// Wrapped measurements rejected.
    pub wrapped_count: u64,
}

impl StatsSnapshot {
    /// Spread between slowest and fastest sample.
    #[must_use]
    pub fn jitter(&self) -> Option<u64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
