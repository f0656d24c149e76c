//! Context switch and mutex acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - The reported context switch is the receiver's sample minus the
//!   sender's pre-delay sample
//! - Uncontended lock and unlock complete inside the acquisition timeout
//! - A contended acquire blocks until release and its measurement spans
//!   the whole wait

use super::common::{fast_config, fast_kernel_config, run, value};
use bench_common::cycles::{read_cycles, CycleTimestamp, Elapsed};
use bench_harness::{measure_lock, HaltingFaultHandler, LockOutcome, Probe, SwitchOutcome};
use bench_kernel::{Kernel, SimKernel, TaskSpec};
use std::sync::{Arc, Mutex};

#[test]
fn test_context_switch_matches_samples() {
    let out = run(fast_config());

    let Some(SwitchOutcome::Measured(m)) = out.summary.handoff.switch else {
        panic!("context switch not measured: {:?}", out.summary.handoff);
    };
    assert!(m.start <= m.end, "receiver sampled before sender");

    let reported = value(&out.lines, "Context Switching Time").unwrap();
    assert_eq!(m.elapsed(), Elapsed::Cycles(reported));
    assert_eq!(reported, m.end.get() - m.start.get());
}

#[test]
fn test_uncontended_mutex() {
    let out = run(fast_config());

    let Some(LockOutcome::Acquired(lock)) = out.summary.handoff.lock else {
        panic!("lock not acquired: {:?}", out.summary.handoff);
    };
    let unlock = out.summary.handoff.unlock.unwrap();

    assert_eq!(
        value(&out.lines, "Mutex Lock Time"),
        lock.elapsed().cycles()
    );
    assert_eq!(
        value(&out.lines, "Mutex Unlock Time"),
        unlock.elapsed().cycles()
    );
}

#[test]
fn test_contended_lock_spans_wait() {
    let kernel = Arc::new(SimKernel::new(
        fast_kernel_config(),
        Arc::new(HaltingFaultHandler::new()),
    ));
    let mutex = kernel.create_mutex().unwrap();
    let released_at: Arc<Mutex<Option<CycleTimestamp>>> = Arc::new(Mutex::new(None));
    let outcome = Arc::new(Mutex::new(None));

    let (k, released) = (Arc::clone(&kernel), Arc::clone(&released_at));
    kernel
        .create_task(TaskSpec::new("holder", 1024, 0, move |_| {
            k.acquire(mutex, 10).unwrap();
            k.delay(20).unwrap();
            *released.lock().unwrap() = Some(read_cycles());
            k.release(mutex).unwrap();
        }))
        .unwrap();

    let (k, out) = (Arc::clone(&kernel), Arc::clone(&outcome));
    kernel
        .create_task(TaskSpec::new("waiter", 1024, 0, move |_| {
            let probe = Probe::hardware();
            let result = measure_lock(k.as_ref(), &probe, mutex, 0x0FFF_FFFF).unwrap();
            *out.lock().unwrap() = Some(result);
            k.release(mutex).unwrap();
        }))
        .unwrap();

    kernel.start_scheduler().unwrap();

    let released = released_at.lock().unwrap().unwrap();
    let Some(LockOutcome::Acquired(m)) = *outcome.lock().unwrap() else {
        panic!("waiter did not acquire the mutex");
    };
    assert!(m.start < released, "acquire started after the release");
    assert!(m.end > released, "acquire returned before the release");
    assert!(kernel.tick_count() >= 20);
}
