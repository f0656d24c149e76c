//! Fault handling acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Memory exhaustion during task creation halts the run
//! - A stack overflow is detected, surfaced through the fault hook, and
//!   halts scheduling
//! - Diagnostics are reported before the run parks

use super::common::{fast_config, fast_kernel_config, run};
use bench_common::state::RunState;
use bench_harness::{HaltingFaultHandler, MemoryReporter};
use bench_kernel::{FaultKind, Kernel, KernelError, SimKernel, TaskSpec};
use std::sync::Arc;

#[test]
fn test_exhaustion_during_creation_halts() {
    let mut config = fast_config();
    config.kernel.heap_size = 2048;

    let out = run(config);

    assert_eq!(out.summary.state, RunState::Halted);
    assert_eq!(out.summary.history, vec![RunState::Boot, RunState::Halted]);
    assert!(out.summary.error.is_some());
    assert!(matches!(
        out.faults.faults().as_slice(),
        [FaultKind::AllocFailed { .. }]
    ));

    assert!(out.lines[0].starts_with("Boot Time: "));
    assert!(out.lines[1].starts_with("Fault: allocation of"));
    assert!(!out.lines.iter().any(|l| l.starts_with("Task Creation Time")));
}

#[test]
fn test_exhaustion_of_handoff_tasks_halts() {
    let mut config = fast_config();
    // Room for the lifecycle probe but not for both handoff tasks
    config.lifecycle.stack_size = 256;
    config.handoff.stack_size = 4096;
    config.kernel.heap_size = 48 * 1024;

    let out = run(config);

    assert_eq!(out.summary.state, RunState::Halted);
    assert!(out.summary.creation.is_some());
    assert!(out.summary.deletion.is_some());
    assert!(out.summary.handoff.switch.is_none());
    assert!(out
        .summary
        .history
        .contains(&RunState::TaskDeleteMeasured));
}

#[test]
fn test_stack_overflow_halts_scheduling() {
    let reporter = Arc::new(MemoryReporter::new());
    let faults = Arc::new(HaltingFaultHandler::with_reporter(reporter.clone()));
    let kernel = Arc::new(SimKernel::new(fast_kernel_config(), faults.clone()));

    let k = Arc::clone(&kernel);
    kernel
        .create_task(TaskSpec::new("deep", 32, 0, move |_| {
            let frame = [0u8; 4096];
            std::hint::black_box(&frame);
            let _ = k.delay(1);
        }))
        .unwrap();

    let result = kernel.start_scheduler();
    assert!(matches!(
        result,
        Err(KernelError::Halted(FaultKind::StackOverflow { .. }))
    ));
    assert!(kernel.is_halted());
    assert_eq!(faults.faults().len(), 1);
    assert!(reporter.rendered()[0].starts_with("Fault: stack overflow in deep"));
}
