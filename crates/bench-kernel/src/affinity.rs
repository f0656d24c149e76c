//! CPU pinning for kernel threads.
//!
//! Start and end samples of a measurement must come from the same counter
//! domain. Pinning every task thread (and the thread that takes the
//! pre-scheduler samples) to one core keeps them there.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use crate::{KernelError, KernelResult};
use bench_common::config::CpuAffinity;
use tracing::{debug, warn};

/// Pin the calling thread to the configured CPU set.
///
/// Returns the CPUs actually applied, or `None` when no affinity is
/// configured or the platform/cpuset refused it (logged, not fatal).
///
/// # Errors
///
/// Returns an error for CPU indices the host cannot represent or for
/// unexpected `sched_setaffinity` failures.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(affinity: &CpuAffinity) -> KernelResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = match affinity {
        CpuAffinity::None => {
            debug!("No CPU affinity configured");
            return Ok(None);
        }
        CpuAffinity::Single(cpu) => vec![*cpu],
        CpuAffinity::Set(cpus) => cpus.clone(),
    };

    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| KernelError::Affinity(format!("invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            debug!(?cpus, "Thread pinned");
            Ok(Some(cpus))
        }
        Err(e) => {
            if e == nix::errno::Errno::EINVAL {
                warn!(?cpus, "Invalid CPU set - some CPUs may not exist or are not allowed");
                Ok(None)
            } else {
                Err(KernelError::Affinity(format!("sched_setaffinity failed: {e}")))
            }
        }
    }
}

/// Pin the calling thread to the configured CPU set.
///
/// Affinity is Linux-only; elsewhere this logs a warning when pinning was
/// requested and always returns `None`.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(affinity: &CpuAffinity) -> KernelResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}
