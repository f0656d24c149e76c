//! Result reporting.
//!
//! One line per quantity, `<Label>: <value>`, or a status sentence. Values
//! are captured before a line is formatted, and a failed or slow write never
//! fails the run.

use crate::handoff::{LockOutcome, SwitchOutcome};
use crate::sweep::{SweepOp, SweepSummary};
use bench_common::cycles::{CycleTimestamp, Elapsed};
use bench_kernel::FaultKind;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// One reportable result.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLine {
    /// Raw counter value at the first reporting opportunity.
    BootTime(CycleTimestamp),
    /// Task creation latency.
    TaskCreation(Elapsed),
    /// Stack depth, in words, of the task whose creation was measured.
    TaskCreationStackSize(usize),
    /// Task deletion latency.
    TaskDeletion(Elapsed),
    /// Delay-triggered handoff between two tasks.
    ContextSwitch(SwitchOutcome),
    /// Mutex acquisition latency.
    MutexLock(LockOutcome),
    /// Mutex release latency.
    MutexUnlock(Elapsed),
    /// Aggregate of repeated measurements at one stack size.
    Sweep {
        /// Operation measured.
        op: SweepOp,
        /// Stack depth in words.
        stack_size: usize,
        /// Sample statistics.
        summary: SweepSummary,
    },
    /// A kernel fault hook fired.
    Fault(FaultKind),
    /// Free-form status sentence.
    Status(String),
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootTime(t) => write!(f, "Boot Time: {t}"),
            Self::TaskCreation(e) => write!(f, "Task Creation Time: {e}"),
            Self::TaskCreationStackSize(words) => write!(f, "Task Creation Stack Size: {words}"),
            Self::TaskDeletion(e) => write!(f, "Task Deletion Time: {e}"),
            Self::ContextSwitch(SwitchOutcome::Measured(m)) => {
                write!(f, "Context Switching Time: {}", m.elapsed())
            }
            Self::ContextSwitch(SwitchOutcome::OrderingViolated) => {
                write!(f, "Context Switching Time: ordering violated")
            }
            Self::MutexLock(LockOutcome::Acquired(m)) => {
                write!(f, "Mutex Lock Time: {}", m.elapsed())
            }
            Self::MutexLock(LockOutcome::TimedOut) => write!(f, "Mutex Lock Time: timeout"),
            Self::MutexUnlock(e) => write!(f, "Mutex Unlock Time: {e}"),
            Self::Sweep {
                op,
                stack_size,
                summary,
            } => write!(f, "{} [stack {stack_size}]: {summary}", op.label()),
            Self::Fault(kind) => write!(f, "Fault: {kind}"),
            Self::Status(text) => f.write_str(text),
        }
    }
}

/// Sink for report lines.
pub trait Reporter: Send + Sync {
    /// Emit one line. Must not block beyond the output primitive and must
    /// not panic on output failure.
    fn report(&self, line: &ReportLine);
}

/// Writes each line to an [`io::Write`] and flushes it.
#[derive(Debug)]
pub struct LineReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl LineReporter<io::Stdout> {
    /// Report to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LineReporter<W> {
    /// Report to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Reporter for LineReporter<W> {
    fn report(&self, line: &ReportLine) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write report line");
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<ReportLine>>,
}

impl MemoryReporter {
    /// Empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines reported so far, in order.
    pub fn lines(&self) -> Vec<ReportLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines reported so far, formatted.
    pub fn rendered(&self) -> Vec<String> {
        self.lines().iter().map(ToString::to_string).collect()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, line: &ReportLine) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());
    }
}
