//! Stack-size sweep of the lifecycle probes.
//!
//! Repeats creation and deletion at each configured stack depth before the
//! scheduler starts and summarises the samples, so that the cost's growth
//! with stack depth can be checked beyond single-sample noise.

use crate::lifecycle::{measure_task_creation, measure_task_deletion};
use crate::probe::Probe;
use bench_common::config::SweepConfig;
use bench_common::cycles::CycleSource;
use bench_common::metrics::CycleStats;
use bench_kernel::{Kernel, KernelResult};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Which lifecycle operation a sweep line covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepOp {
    /// `create_task`.
    Creation,
    /// `delete_task`.
    Deletion,
}

impl SweepOp {
    /// Report label of the operation.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Creation => "Task Creation Time",
            Self::Deletion => "Task Deletion Time",
        }
    }
}

/// Statistics of one operation at one stack depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    /// Valid samples.
    pub samples: u64,
    /// Wrapped samples rejected.
    pub wrapped: u64,
    /// Fastest sample.
    pub min: Option<u64>,
    /// Slowest sample.
    pub max: Option<u64>,
    /// Median sample.
    pub median: Option<u64>,
    /// Mean of the valid samples.
    pub mean: Option<u64>,
    /// Spread between slowest and fastest sample.
    pub jitter: Option<u64>,
    /// Requested percentiles, in order.
    pub percentiles: Vec<(f64, u64)>,
}

impl SweepSummary {
    fn from_stats(stats: &CycleStats, percentiles: &[f64]) -> Self {
        let snapshot = stats.snapshot();
        Self {
            samples: snapshot.total,
            wrapped: snapshot.wrapped_count,
            min: snapshot.min,
            max: snapshot.max,
            median: snapshot.median,
            mean: snapshot.mean,
            jitter: snapshot.jitter(),
            percentiles: stats.percentiles(percentiles),
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Some(min), Some(max)) = (self.min, self.max) else {
            return write!(f, "no samples");
        };
        write!(f, "min {min}")?;
        for (p, value) in &self.percentiles {
            write!(f, " p{p} {value}")?;
        }
        write!(f, " max {max}")?;
        if let Some(mean) = self.mean {
            write!(f, " mean {mean}")?;
        }
        if let Some(jitter) = self.jitter {
            write!(f, " jitter {jitter}")?;
        }
        if self.wrapped > 0 {
            write!(f, " (wrapped {})", self.wrapped)?;
        }
        Ok(())
    }
}

/// Creation and deletion statistics at one stack depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    /// Stack depth in words.
    pub stack_size: usize,
    /// Creation statistics.
    pub creation: SweepSummary,
    /// Deletion statistics.
    pub deletion: SweepSummary,
}

/// All sweep points, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepResult {
    /// One point per configured stack size.
    pub points: Vec<SweepPoint>,
}

impl SweepResult {
    /// Check that median creation cost does not decrease with stack depth.
    ///
    /// A point may undercut its predecessor by up to `tolerance` (a fraction
    /// of the predecessor's median) to absorb noise. Points are compared in
    /// ascending stack order; points without samples are skipped.
    #[must_use]
    pub fn is_monotonic(&self, tolerance: f64) -> bool {
        let mut points: Vec<&SweepPoint> = self.points.iter().collect();
        points.sort_by_key(|p| p.stack_size);

        let medians: Vec<u64> = points.iter().filter_map(|p| p.creation.median).collect();
        medians.windows(2).all(|pair| {
            let floor = pair[0] as f64 * (1.0 - tolerance);
            pair[1] as f64 >= floor
        })
    }
}

/// Run the sweep. The kernel must not have started scheduling.
///
/// # Errors
///
/// Propagates the first kernel failure; a fault halts the kernel and the
/// sweep stops there.
pub fn run_sweep<K, C>(
    kernel: &Arc<K>,
    probe: &Probe<C>,
    config: &SweepConfig,
    priority: u8,
) -> KernelResult<SweepResult>
where
    K: Kernel + 'static,
    C: CycleSource,
{
    let mut result = SweepResult::default();

    for &stack_size in &config.stack_sizes {
        let mut creation = CycleStats::new(config.iterations);
        let mut deletion = CycleStats::new(config.iterations);

        for _ in 0..config.iterations {
            let sample = measure_task_creation(kernel, probe, stack_size, priority)?;
            creation.record(sample.measurement.elapsed());
            let removed = measure_task_deletion(kernel.as_ref(), probe, sample.handle)?;
            deletion.record(removed.elapsed());
        }

        let point = SweepPoint {
            stack_size,
            creation: SweepSummary::from_stats(&creation, &config.percentiles),
            deletion: SweepSummary::from_stats(&deletion, &config.percentiles),
        };
        debug!(
            stack_size,
            creation_median = ?point.creation.median,
            deletion_median = ?point.deletion.median,
            "Sweep point measured"
        );
        result.points.push(point);
    }

    info!(
        points = result.points.len(),
        iterations = config.iterations,
        "Stack-size sweep complete"
    );
    Ok(result)
}
