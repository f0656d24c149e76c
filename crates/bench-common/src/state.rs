//! Run state machine for one benchmark pass.
//!
//! A run moves strictly forward through the measurements:
//! BOOT → TASK_CREATE → TASK_DELETE → SCHEDULER_STARTED → CONTEXT_SWITCH →
//! MUTEX_LOCK → MUTEX_UNLOCK → STEADY_STATE
//!
//! A lock timeout skips MUTEX_UNLOCK. Any state may fall into HALTED on a
//! fatal fault. Neither STEADY_STATE nor HALTED has an exit: the run parks
//! until the target is reset.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Reset; boot time not yet reported.
    #[default]
    Boot,
    /// Task creation latency reported.
    TaskCreateMeasured,
    /// Task deletion latency reported.
    TaskDeleteMeasured,
    /// Scheduler handed control to the benchmark tasks.
    SchedulerStarted,
    /// Context switch latency reported.
    ContextSwitchMeasured,
    /// Mutex acquisition latency (or timeout) reported.
    MutexLockMeasured,
    /// Mutex release latency reported.
    MutexUnlockMeasured,
    /// All measurements done; idle until reset.
    SteadyState,
    /// Fatal fault; idle until reset.
    Halted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::TaskCreateMeasured => write!(f, "TASK_CREATE"),
            Self::TaskDeleteMeasured => write!(f, "TASK_DELETE"),
            Self::SchedulerStarted => write!(f, "SCHEDULER_STARTED"),
            Self::ContextSwitchMeasured => write!(f, "CONTEXT_SWITCH"),
            Self::MutexLockMeasured => write!(f, "MUTEX_LOCK"),
            Self::MutexUnlockMeasured => write!(f, "MUTEX_UNLOCK"),
            Self::SteadyState => write!(f, "STEADY_STATE"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

impl RunState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::{
            Boot, ContextSwitchMeasured, Halted, MutexLockMeasured, MutexUnlockMeasured,
            SchedulerStarted, SteadyState, TaskCreateMeasured, TaskDeleteMeasured,
        };

        if target == Halted {
            return *self != Halted;
        }

        matches!(
            (self, target),
            (Boot, TaskCreateMeasured)
                | (TaskCreateMeasured, TaskDeleteMeasured)
                | (TaskDeleteMeasured, SchedulerStarted)
                | (SchedulerStarted, ContextSwitchMeasured)
                | (ContextSwitchMeasured, MutexLockMeasured)
                | (MutexLockMeasured, MutexUnlockMeasured)
                | (MutexUnlockMeasured, SteadyState)
                // Lock timed out: nothing was acquired, so nothing to release
                | (MutexLockMeasured, SteadyState)
        )
    }

    /// Returns true once the run can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SteadyState | Self::Halted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RunState,
    history: Vec<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RunState::Boot,
            history: vec![RunState::Boot],
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.current
    }

    /// Every state visited, in order, starting with BOOT.
    #[must_use]
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidStateTransition`] if `target` does not
    /// follow the current state.
    pub fn transition(&mut self, target: RunState) -> BenchResult<()> {
        if self.current.can_transition_to(target) {
            self.current = target;
            self.history.push(target);
            Ok(())
        } else {
            Err(BenchError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force the run into HALTED (no-op if already halted).
    pub fn halt(&mut self) {
        if self.current != RunState::Halted {
            self.current = RunState::Halted;
            self.history.push(RunState::Halted);
        }
    }
}
