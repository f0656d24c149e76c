//! Fault policy: every kernel fault halts the run.

use crate::reporter::{ReportLine, Reporter};
use bench_kernel::{FaultAction, FaultHandler, FaultKind, TaskHandle};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Records each fault, reports it if a reporter is attached, and asks the
/// kernel to halt.
#[derive(Default)]
pub struct HaltingFaultHandler {
    faults: Mutex<Vec<FaultKind>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl std::fmt::Debug for HaltingFaultHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaltingFaultHandler")
            .field("faults", &self.faults())
            .finish_non_exhaustive()
    }
}

impl HaltingFaultHandler {
    /// Handler that only records and logs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that also emits a `Fault:` report line.
    #[must_use]
    pub fn with_reporter(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            faults: Mutex::new(Vec::new()),
            reporter: Some(reporter),
        }
    }

    /// Faults seen so far.
    pub fn faults(&self) -> Vec<FaultKind> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, fault: FaultKind) -> FaultAction {
        if let Some(reporter) = &self.reporter {
            reporter.report(&ReportLine::Fault(fault.clone()));
        }
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
        FaultAction::Halt
    }
}

impl FaultHandler for HaltingFaultHandler {
    fn on_alloc_failed(&self, requested: usize, available: usize) -> FaultAction {
        error!(requested, available, "Kernel out of memory, halting run");
        self.record(FaultKind::AllocFailed { requested })
    }

    fn on_stack_overflow(&self, task: TaskHandle, name: &str) -> FaultAction {
        error!(%task, name, "Task stack overflow, halting run");
        self.record(FaultKind::StackOverflow {
            task,
            name: name.to_string(),
        })
    }
}
