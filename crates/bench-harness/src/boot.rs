//! Boot timer.

use bench_common::cycles::{CycleSource, CycleTimestamp};
use tracing::debug;

/// Read the counter once, as early as reporting allows.
///
/// The counter starts at reset, so the raw value is the number of cycles
/// spent between reset and this call.
pub fn boot_time<C: CycleSource>(source: &C) -> CycleTimestamp {
    let now = source.read_cycles();
    debug!(cycles = now.get(), "Boot time sampled");
    now
}
