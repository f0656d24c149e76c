//! Benchmark run orchestrator.
//!
//! Drives one pass through the run state machine:
//!
//! 1. Report the boot time (first thing, before any task exists).
//! 2. Pin the calling thread so pre-scheduler samples share one counter.
//! 3. Measure creation of the placeholder task, then its deletion.
//! 4. Optionally run the stack-size sweep.
//! 5. Create the handoff mutex and tasks and start the scheduler, which
//!    runs the context switch and mutex probes.
//!
//! Any fatal error halts the run. The summary carries everything measured
//! up to that point.

use crate::boot::boot_time;
use crate::handoff::{advance, HandoffBench, HandoffResults};
use crate::lifecycle::{measure_task_creation, measure_task_deletion};
use crate::probe::Probe;
use crate::reporter::{ReportLine, Reporter};
use crate::sweep::{run_sweep, SweepOp, SweepResult};
use bench_common::config::BenchConfig;
use bench_common::cycles::{CycleSource, CycleTimestamp, HardwareCounter, Measurement};
use bench_common::error::BenchResult;
use bench_common::state::{RunState, StateMachine};
use bench_kernel::affinity::pin_current_thread;
use bench_kernel::Kernel;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// Everything one run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Final state: `SteadyState` or `Halted`.
    pub state: RunState,
    /// States visited, in order.
    pub history: Vec<RunState>,
    /// Raw boot counter value.
    pub boot_time: CycleTimestamp,
    /// Creation probe of the placeholder task.
    pub creation: Option<Measurement>,
    /// Stack depth used for the creation probe.
    pub creation_stack_size: usize,
    /// Deletion probe of the placeholder task.
    pub deletion: Option<Measurement>,
    /// Sweep results when enabled.
    pub sweep: Option<SweepResult>,
    /// Context switch and mutex probes.
    pub handoff: HandoffResults,
    /// Fatal error that halted the run.
    pub error: Option<String>,
}

impl RunSummary {
    /// Returns true if the run halted on a fault.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.state == RunState::Halted
    }
}

/// Runs the full benchmark sequence against one kernel.
pub struct Harness<K: Kernel + 'static, C: CycleSource + Clone + 'static = HardwareCounter> {
    kernel: Arc<K>,
    config: BenchConfig,
    reporter: Arc<dyn Reporter>,
    probe: Probe<C>,
    run: Arc<Mutex<StateMachine>>,
}

impl<K: Kernel + 'static> Harness<K, HardwareCounter> {
    /// Harness sampling the hardware cycle counter.
    pub fn new(kernel: Arc<K>, config: BenchConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self::with_probe(kernel, config, reporter, Probe::hardware())
    }
}

impl<K: Kernel + 'static, C: CycleSource + Clone + 'static> Harness<K, C> {
    /// Harness sampling an arbitrary cycle source.
    pub fn with_probe(
        kernel: Arc<K>,
        config: BenchConfig,
        reporter: Arc<dyn Reporter>,
        probe: Probe<C>,
    ) -> Self {
        Self {
            kernel,
            config,
            reporter,
            probe,
            run: Arc::new(Mutex::new(StateMachine::new())),
        }
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    /// Execute one pass. Never panics on kernel failure; a fatal error
    /// leaves the run in `Halted` with the error recorded.
    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary {
            creation_stack_size: self.config.lifecycle.stack_size,
            ..RunSummary::default()
        };

        if let Err(e) = self.execute(&mut summary) {
            error!(error = %e, state = %self.state(), "Benchmark run halted");
            self.run
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .halt();
            summary.error = Some(e.to_string());
        }

        let sm = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        summary.state = sm.state();
        summary.history = sm.history().to_vec();
        summary
    }

    fn execute(&self, summary: &mut RunSummary) -> BenchResult<()> {
        let boot = boot_time(self.probe.source());
        self.reporter.report(&ReportLine::BootTime(boot));
        summary.boot_time = boot;

        if let Err(e) = pin_current_thread(&self.config.kernel.cpu_affinity) {
            warn!(error = %e, "Failed to pin harness thread, samples may cross counter domains");
        }

        let lifecycle = &self.config.lifecycle;
        let sample = measure_task_creation(
            &self.kernel,
            &self.probe,
            lifecycle.stack_size,
            lifecycle.priority,
        )?;
        self.reporter
            .report(&ReportLine::TaskCreation(sample.measurement.elapsed()));
        self.reporter
            .report(&ReportLine::TaskCreationStackSize(sample.stack_size));
        summary.creation = Some(sample.measurement);
        advance(&self.run, RunState::TaskCreateMeasured)?;

        let deletion = measure_task_deletion(self.kernel.as_ref(), &self.probe, sample.handle)?;
        self.reporter
            .report(&ReportLine::TaskDeletion(deletion.elapsed()));
        summary.deletion = Some(deletion);
        advance(&self.run, RunState::TaskDeleteMeasured)?;

        if self.config.sweep.enabled {
            let sweep = run_sweep(
                &self.kernel,
                &self.probe,
                &self.config.sweep,
                lifecycle.priority,
            )?;
            self.report_sweep(&sweep);
            summary.sweep = Some(sweep);
        }

        let bench = HandoffBench::new(
            Arc::clone(&self.kernel),
            self.probe.clone(),
            self.config.handoff.clone(),
            Arc::clone(&self.reporter),
            Arc::clone(&self.run),
        )?;
        bench.spawn()?;

        advance(&self.run, RunState::SchedulerStarted)?;
        let scheduled = self.kernel.start_scheduler();
        summary.handoff = bench.results();
        scheduled?;

        advance(&self.run, RunState::SteadyState)?;
        info!("Benchmark run complete");
        Ok(())
    }

    fn report_sweep(&self, sweep: &SweepResult) {
        for point in &sweep.points {
            self.reporter.report(&ReportLine::Sweep {
                op: SweepOp::Creation,
                stack_size: point.stack_size,
                summary: point.creation.clone(),
            });
            self.reporter.report(&ReportLine::Sweep {
                op: SweepOp::Deletion,
                stack_size: point.stack_size,
                summary: point.deletion.clone(),
            });
        }
    }
}
