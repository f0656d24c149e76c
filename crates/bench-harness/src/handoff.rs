//! Cross-task handoff: context switch, mutex lock and mutex unlock latency.
//!
//! Two equal-priority tasks are created, sender first:
//!
//! - The sender reports a status line, samples the counter, publishes the
//!   sample and blocks on a timed delay.
//! - The receiver, dispatched because the sender blocked, samples the
//!   counter as its very first action. The difference is the context switch
//!   figure. It includes scheduling overhead, so it is an upper bound.
//! - The receiver then times an acquire and a release of the shared mutex.
//!
//! The cell carrying the sender's sample is owned by the benchmark and handed
//! to both bodies; it is never a process-wide global.

use crate::probe::Probe;
use crate::reporter::{ReportLine, Reporter};
use bench_common::config::HandoffConfig;
use bench_common::cycles::{CycleSource, CycleTimestamp, HardwareCounter, Measurement};
use bench_common::error::BenchResult;
use bench_common::state::{RunState, StateMachine};
use bench_kernel::{Kernel, KernelError, KernelResult, MutexHandle, TaskHandle, TaskSpec, Ticks};
use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Name of the task that blocks first.
pub const SENDER_TASK_NAME: &str = "Task 2";

/// Name of the task dispatched by the sender blocking.
pub const RECEIVER_TASK_NAME: &str = "Task 3";

/// Single-writer, single-reader slot for one counter sample.
///
/// The writer publishes with release ordering; the reader observes the
/// value only after seeing the published flag with acquire ordering.
#[derive(Debug, Default)]
pub struct HandoffCell {
    value: CachePadded<AtomicU64>,
    published: AtomicBool,
}

impl HandoffCell {
    /// Empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sample for the reader.
    #[inline(always)]
    pub fn publish(&self, sample: CycleTimestamp) {
        self.value.store(sample.get(), Ordering::Relaxed);
        self.published.store(true, Ordering::Release);
    }

    /// Consume the published sample, if any.
    #[inline(always)]
    pub fn take(&self) -> Option<CycleTimestamp> {
        self.published
            .swap(false, Ordering::Acquire)
            .then(|| CycleTimestamp(self.value.load(Ordering::Relaxed)))
    }
}

/// Outcome of the context switch probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchOutcome {
    /// `start` is the sender's sample, `end` the receiver's.
    Measured(Measurement),
    /// The receiver ran before the sender published.
    OrderingViolated,
}

/// Outcome of the mutex acquisition probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockOutcome {
    /// Acquired; samples bracket the `acquire` call.
    Acquired(Measurement),
    /// Not acquired within the timeout.
    TimedOut,
}

/// Everything the handoff tasks measured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandoffResults {
    /// Context switch probe.
    pub switch: Option<SwitchOutcome>,
    /// Lock probe.
    pub lock: Option<LockOutcome>,
    /// Unlock probe; absent when the lock timed out.
    pub unlock: Option<Measurement>,
}

/// Time one `acquire` call.
///
/// # Errors
///
/// Any kernel error other than [`KernelError::Timeout`], which is reported
/// as [`LockOutcome::TimedOut`].
pub fn measure_lock<K, C>(
    kernel: &K,
    probe: &Probe<C>,
    mutex: MutexHandle,
    timeout: Ticks,
) -> KernelResult<LockOutcome>
where
    K: Kernel + ?Sized,
    C: CycleSource,
{
    match probe.measure(|| kernel.acquire(mutex, timeout)) {
        Ok(((), m)) => Ok(LockOutcome::Acquired(m)),
        Err(KernelError::Timeout { .. }) => Ok(LockOutcome::TimedOut),
        Err(e) => Err(e),
    }
}

/// Time one `release` call.
///
/// # Errors
///
/// [`KernelError::NotOwner`] if the caller does not hold `mutex`.
pub fn measure_unlock<K, C>(
    kernel: &K,
    probe: &Probe<C>,
    mutex: MutexHandle,
) -> KernelResult<Measurement>
where
    K: Kernel + ?Sized,
    C: CycleSource,
{
    probe.measure(|| kernel.release(mutex)).map(|((), m)| m)
}

/// Move the run forward and log the transition.
pub(crate) fn advance(run: &Mutex<StateMachine>, target: RunState) -> BenchResult<()> {
    let mut sm = run.lock().unwrap_or_else(PoisonError::into_inner);
    let from = sm.state();
    sm.transition(target)?;
    info!(%from, to = %target, "State transition");
    Ok(())
}

/// The context switch and mutex benchmark, shared by its two task bodies.
pub struct HandoffBench<K: Kernel + 'static, C: CycleSource + 'static = HardwareCounter> {
    kernel: Arc<K>,
    probe: Probe<C>,
    cell: HandoffCell,
    mutex: MutexHandle,
    config: HandoffConfig,
    reporter: Arc<dyn Reporter>,
    run: Arc<Mutex<StateMachine>>,
    results: Mutex<HandoffResults>,
}

impl<K: Kernel + 'static, C: CycleSource + 'static> std::fmt::Debug for HandoffBench<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffBench")
            .field("mutex", &self.mutex)
            .field("config", &self.config)
            .field("results", &self.results())
            .finish_non_exhaustive()
    }
}

impl<K: Kernel + 'static, C: CycleSource + 'static> HandoffBench<K, C> {
    /// Create the shared mutex and the benchmark state.
    ///
    /// # Errors
    ///
    /// Propagates mutex creation failure.
    pub fn new(
        kernel: Arc<K>,
        probe: Probe<C>,
        config: HandoffConfig,
        reporter: Arc<dyn Reporter>,
        run: Arc<Mutex<StateMachine>>,
    ) -> KernelResult<Arc<Self>> {
        let mutex = kernel.create_mutex()?;
        debug!(%mutex, "Handoff mutex created");
        Ok(Arc::new(Self {
            kernel,
            probe,
            cell: HandoffCell::new(),
            mutex,
            config,
            reporter,
            run,
            results: Mutex::new(HandoffResults::default()),
        }))
    }

    /// The mutex under test.
    pub fn mutex(&self) -> MutexHandle {
        self.mutex
    }

    /// Snapshot of the measurements taken so far.
    pub fn results(&self) -> HandoffResults {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create sender then receiver.
    ///
    /// # Errors
    ///
    /// Propagates task creation failure.
    pub fn spawn(self: &Arc<Self>) -> KernelResult<(TaskHandle, TaskHandle)> {
        let sender = self.spawn_sender()?;
        let receiver = self.spawn_receiver()?;
        Ok((sender, receiver))
    }

    /// Create the task that samples and then blocks.
    ///
    /// # Errors
    ///
    /// Propagates task creation failure.
    pub fn spawn_sender(self: &Arc<Self>) -> KernelResult<TaskHandle> {
        let bench = Arc::clone(self);
        self.kernel.create_task(TaskSpec::new(
            SENDER_TASK_NAME,
            self.config.stack_size,
            self.config.priority,
            move |_| bench.sender(),
        ))
    }

    /// Create the task that samples on dispatch and times the mutex.
    ///
    /// # Errors
    ///
    /// Propagates task creation failure.
    pub fn spawn_receiver(self: &Arc<Self>) -> KernelResult<TaskHandle> {
        let bench = Arc::clone(self);
        self.kernel.create_task(TaskSpec::new(
            RECEIVER_TASK_NAME,
            self.config.stack_size,
            self.config.priority,
            move |_| bench.receiver(),
        ))
    }

    fn update(&self, f: impl FnOnce(&mut HandoffResults)) {
        f(&mut self.results.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn sender(&self) {
        self.reporter.report(&ReportLine::Status(format!(
            "This is {SENDER_TASK_NAME}."
        )));

        let before = self.probe.sample();
        self.cell.publish(before);
        if let Err(e) = self.kernel.delay(self.config.switch_delay_ticks) {
            error!(error = %e, "Sender delay failed");
            return;
        }

        self.park();
    }

    fn receiver(&self) {
        let after = self.probe.sample();

        let switch = match self.cell.take() {
            Some(before) => SwitchOutcome::Measured(Measurement::new(before, after)),
            None => {
                warn!("Receiver ran before the sender published its sample");
                SwitchOutcome::OrderingViolated
            }
        };
        self.reporter.report(&ReportLine::ContextSwitch(switch));
        self.update(|r| r.switch = Some(switch));
        if let Err(e) = advance(&self.run, RunState::ContextSwitchMeasured) {
            warn!(error = %e, "Context switch reported out of order");
        }

        self.reporter.report(&ReportLine::Status(format!(
            "This is {RECEIVER_TASK_NAME}."
        )));

        if let Err(e) = self.time_mutex() {
            error!(error = %e, "Mutex benchmark failed");
            return;
        }

        if let Err(e) = self.kernel.delay(self.config.settle_delay_ticks) {
            error!(error = %e, "Receiver settle delay failed");
            return;
        }

        self.park();
    }

    fn time_mutex(&self) -> BenchResult<()> {
        let lock = measure_lock(
            self.kernel.as_ref(),
            &self.probe,
            self.mutex,
            self.config.lock_timeout_ticks,
        )?;
        self.reporter.report(&ReportLine::MutexLock(lock));
        self.update(|r| r.lock = Some(lock));
        advance(&self.run, RunState::MutexLockMeasured)?;

        if lock == LockOutcome::TimedOut {
            warn!(timeout = self.config.lock_timeout_ticks, "Mutex acquire timed out");
            return Ok(());
        }

        let unlock = measure_unlock(self.kernel.as_ref(), &self.probe, self.mutex)?;
        self.reporter.report(&ReportLine::MutexUnlock(unlock.elapsed()));
        self.update(|r| r.unlock = Some(unlock));
        advance(&self.run, RunState::MutexUnlockMeasured)
    }

    fn park(&self) {
        match self.kernel.suspend() {
            Ok(()) | Err(KernelError::SchedulerStopped) => {}
            Err(e) => warn!(error = %e, "Handoff task failed to park"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::HaltingFaultHandler;
    use crate::reporter::MemoryReporter;
    use bench_common::config::{CpuAffinity, KernelConfig};
    use bench_kernel::SimKernel;
    use std::time::Duration;

    fn kernel() -> Arc<SimKernel> {
        let config = KernelConfig {
            tick_period: Duration::from_micros(100),
            cpu_affinity: CpuAffinity::None,
            ..KernelConfig::default()
        };
        Arc::new(SimKernel::new(config, Arc::new(HaltingFaultHandler::new())))
    }

    fn handoff_config() -> HandoffConfig {
        HandoffConfig {
            switch_delay_ticks: 5,
            settle_delay_ticks: 5,
            ..HandoffConfig::default()
        }
    }

    fn scheduler_started() -> Arc<Mutex<StateMachine>> {
        let mut sm = StateMachine::new();
        for state in [
            RunState::TaskCreateMeasured,
            RunState::TaskDeleteMeasured,
            RunState::SchedulerStarted,
        ] {
            sm.transition(state).unwrap();
        }
        Arc::new(Mutex::new(sm))
    }

    #[test]
    fn test_cell_publish_take() {
        let cell = HandoffCell::new();
        assert_eq!(cell.take(), None);

        cell.publish(CycleTimestamp(77));
        assert_eq!(cell.take(), Some(CycleTimestamp(77)));
        // Single reader: the sample is consumed
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn test_full_handoff() {
        let k = kernel();
        let reporter = Arc::new(MemoryReporter::new());
        let run = scheduler_started();

        let bench = HandoffBench::new(
            Arc::clone(&k),
            Probe::hardware(),
            handoff_config(),
            reporter.clone(),
            Arc::clone(&run),
        )
        .unwrap();
        bench.spawn().unwrap();
        k.start_scheduler().unwrap();

        let results = bench.results();
        assert!(matches!(results.switch, Some(SwitchOutcome::Measured(_))));
        assert!(matches!(results.lock, Some(LockOutcome::Acquired(_))));
        assert!(results.unlock.is_some());
        assert_eq!(run.lock().unwrap().state(), RunState::MutexUnlockMeasured);

        let lines = reporter.rendered();
        assert_eq!(lines[0], "This is Task 2.");
        assert!(lines[1].starts_with("Context Switching Time: "));
        assert_eq!(lines[2], "This is Task 3.");
        assert!(lines[3].starts_with("Mutex Lock Time: "));
        assert!(lines[4].starts_with("Mutex Unlock Time: "));
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_receiver_alone_is_ordering_violation() {
        let k = kernel();
        let reporter = Arc::new(MemoryReporter::new());

        let bench = HandoffBench::new(
            Arc::clone(&k),
            Probe::hardware(),
            handoff_config(),
            reporter.clone(),
            scheduler_started(),
        )
        .unwrap();
        bench.spawn_receiver().unwrap();
        k.start_scheduler().unwrap();

        assert_eq!(
            bench.results().switch,
            Some(SwitchOutcome::OrderingViolated)
        );
        assert_eq!(
            reporter.rendered()[0],
            "Context Switching Time: ordering violated"
        );
    }

    #[test]
    fn test_held_mutex_reports_timeout_and_skips_unlock() {
        let k = kernel();
        let reporter = Arc::new(MemoryReporter::new());
        let run = scheduler_started();
        let config = HandoffConfig {
            lock_timeout_ticks: 3,
            ..handoff_config()
        };

        let bench = HandoffBench::new(
            Arc::clone(&k),
            Probe::hardware(),
            config,
            reporter.clone(),
            Arc::clone(&run),
        )
        .unwrap();

        // Runs first and keeps the mutex well past the receiver's timeout
        let (kh, mutex) = (Arc::clone(&k), bench.mutex());
        k.create_task(TaskSpec::new("holder", 1024, 0, move |_| {
            kh.acquire(mutex, 1).unwrap();
            kh.delay(50).unwrap();
            kh.release(mutex).unwrap();
        }))
        .unwrap();
        bench.spawn().unwrap();
        k.start_scheduler().unwrap();

        let results = bench.results();
        assert!(matches!(results.switch, Some(SwitchOutcome::Measured(_))));
        assert_eq!(results.lock, Some(LockOutcome::TimedOut));
        assert!(results.unlock.is_none());

        let lines = reporter.rendered();
        assert!(lines.contains(&"Mutex Lock Time: timeout".to_string()), "{lines:?}");
        assert!(!lines.iter().any(|l| l.starts_with("Mutex Unlock Time")));

        let mut sm = run.lock().unwrap();
        assert_eq!(sm.state(), RunState::MutexLockMeasured);
        sm.transition(RunState::SteadyState).unwrap();
    }

    #[test]
    fn test_lock_timeout_outcome() {
        let k = kernel();
        let mutex = k.create_mutex().unwrap();
        let outcome = Arc::new(Mutex::new(None));

        let kh = Arc::clone(&k);
        k.create_task(TaskSpec::new("holder", 1024, 1, move |_| {
            kh.acquire(mutex, 1).unwrap();
            kh.delay(50).unwrap();
            kh.release(mutex).unwrap();
        }))
        .unwrap();

        let (kw, out) = (Arc::clone(&k), Arc::clone(&outcome));
        k.create_task(TaskSpec::new("waiter", 1024, 1, move |_| {
            let probe = Probe::hardware();
            *out.lock().unwrap() = Some(measure_lock(kw.as_ref(), &probe, mutex, 3));
        }))
        .unwrap();

        k.start_scheduler().unwrap();
        assert_eq!(*outcome.lock().unwrap(), Some(Ok(LockOutcome::TimedOut)));
    }
}
