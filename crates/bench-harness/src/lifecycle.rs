//! Task creation and deletion latency.
//!
//! Both probes run before the scheduler starts, so the kernel performs the
//! operation synchronously on the calling thread and nothing else can be
//! dispatched in between the two samples.

use crate::probe::Probe;
use bench_common::cycles::{CycleSource, Measurement};
use bench_kernel::{Kernel, KernelError, KernelResult, TaskHandle, TaskSpec};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name given to the task whose creation is measured.
pub const PLACEHOLDER_TASK_NAME: &str = "Task 1";

/// Outcome of one creation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationSample {
    /// The task created; still alive.
    pub handle: TaskHandle,
    /// Samples bracketing `create_task`.
    pub measurement: Measurement,
    /// Stack depth in words.
    pub stack_size: usize,
}

/// Body of the placeholder task: park for good if ever dispatched.
fn park<K: Kernel>(kernel: &K) {
    match kernel.suspend() {
        Ok(()) | Err(KernelError::SchedulerStopped) => {}
        Err(e) => warn!(error = %e, "Placeholder task failed to park"),
    }
}

/// Measure one `create_task` call.
///
/// The task spec is fully built before the first sample so that only the
/// kernel call is timed.
///
/// # Errors
///
/// Propagates the kernel's error, typically
/// [`KernelError::ResourceExhausted`].
pub fn measure_task_creation<K, C>(
    kernel: &Arc<K>,
    probe: &Probe<C>,
    stack_size: usize,
    priority: u8,
) -> KernelResult<CreationSample>
where
    K: Kernel + 'static,
    C: CycleSource,
{
    let body_kernel = Arc::clone(kernel);
    let spec = TaskSpec::new(PLACEHOLDER_TASK_NAME, stack_size, priority, move |_| {
        park(body_kernel.as_ref());
    });

    let (handle, measurement) = probe.measure(|| kernel.create_task(spec))?;
    debug!(%handle, stack_size, elapsed = %measurement.elapsed(), "Task creation measured");

    Ok(CreationSample {
        handle,
        measurement,
        stack_size,
    })
}

/// Measure one `delete_task` call on a task that is not running.
///
/// # Errors
///
/// [`KernelError::UnknownTask`] if `handle` was already deleted.
pub fn measure_task_deletion<K, C>(
    kernel: &K,
    probe: &Probe<C>,
    handle: TaskHandle,
) -> KernelResult<Measurement>
where
    K: Kernel + ?Sized,
    C: CycleSource,
{
    let ((), measurement) = probe.measure(|| kernel.delete_task(handle))?;
    debug!(%handle, elapsed = %measurement.elapsed(), "Task deletion measured");
    Ok(measurement)
}
