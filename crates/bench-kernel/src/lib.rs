//! Kernel boundary for the benchmark harness.
//!
//! This crate provides:
//! - [`Kernel`] trait: the task, mutex and delay contract the harness relies on
//! - [`FaultHandler`] trait: hooks the kernel invokes on fatal conditions
//! - [`sim`] module with [`SimKernel`], a simulated preemptive kernel for hosts
//! - [`affinity`] module for pinning kernel threads to one counter domain

pub mod affinity;
pub mod sim;

pub use sim::SimKernel;

use bench_common::error::BenchError;
use std::fmt;
use thiserror::Error;

/// Kernel time unit. The length of a tick is a kernel configuration value.
pub type Ticks = u32;

/// Task body. Receives the parameter given at creation.
pub type TaskEntry = Box<dyn FnOnce(usize) + Send + 'static>;

/// Opaque identifier of a kernel task. Invalid once the task is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u32);

impl TaskHandle {
    /// Wrap a raw kernel identifier.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw kernel identifier.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Opaque identifier of a kernel mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutexHandle(u32);

impl MutexHandle {
    /// Wrap a raw kernel identifier.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MutexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutex#{}", self.0)
    }
}

/// Everything the kernel needs to instantiate a task.
pub struct TaskSpec {
    /// Human-readable task name.
    pub name: String,
    /// Task body.
    pub entry: TaskEntry,
    /// Stack depth in words.
    pub stack_size: usize,
    /// Parameter passed to the body.
    pub param: usize,
    /// Scheduling priority; higher runs first.
    pub priority: u8,
}

impl TaskSpec {
    /// Describe a task with a zero parameter.
    pub fn new<F>(name: impl Into<String>, stack_size: usize, priority: u8, entry: F) -> Self
    where
        F: FnOnce(usize) + Send + 'static,
    {
        Self {
            name: name.into(),
            entry: Box::new(entry),
            stack_size,
            param: 0,
            priority,
        }
    }

    /// Set the parameter passed to the body.
    #[must_use]
    pub fn with_param(mut self, param: usize) -> Self {
        self.param = param;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .field("param", &self.param)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Scheduling state of a live task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for the processor.
    Ready,
    /// Holds the processor.
    Running,
    /// Waiting on a delay or a mutex.
    Blocked,
    /// Permanently idle; never dispatched again.
    Parked,
}

/// A fatal condition detected by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Task or mutex memory could not be allocated.
    AllocFailed {
        /// Bytes requested.
        requested: usize,
    },
    /// A task exceeded its stack.
    StackOverflow {
        /// Offending task.
        task: TaskHandle,
        /// Its name.
        name: String,
    },
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocFailed { requested } => write!(f, "allocation of {requested} bytes failed"),
            Self::StackOverflow { task, name } => write!(f, "stack overflow in {name} ({task})"),
        }
    }
}

/// What the kernel should do after a fault hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Disable scheduling; every blocked or future kernel call fails.
    Halt,
    /// Fail only the offending call.
    Continue,
}

/// Hooks invoked by the kernel on fatal conditions.
///
/// Called with kernel internals locked: implementations must not call back
/// into the kernel.
pub trait FaultHandler: Send + Sync {
    /// Task or mutex creation ran out of memory.
    fn on_alloc_failed(&self, requested: usize, available: usize) -> FaultAction;

    /// A task's stack usage exceeded its allocation.
    fn on_stack_overflow(&self, task: TaskHandle, name: &str) -> FaultAction;
}

/// The preemptive kernel contract the harness measures.
pub trait Kernel: Send + Sync {
    /// Instantiate a task. Synchronous; does not run the task.
    ///
    /// # Errors
    ///
    /// [`KernelError::ResourceExhausted`] when memory for the stack or control
    /// block is not available.
    fn create_task(&self, spec: TaskSpec) -> KernelResult<TaskHandle>;

    /// Tear down a task that is not currently running.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnknownTask`] if the handle was never valid or was
    /// already deleted.
    fn delete_task(&self, task: TaskHandle) -> KernelResult<()>;

    /// Hand the processor to the ready tasks.
    ///
    /// Blocks the caller while tasks run.
    ///
    /// # Errors
    ///
    /// [`KernelError::Halted`] if a fault stopped scheduling.
    fn start_scheduler(&self) -> KernelResult<()>;

    /// Create an unlocked mutex.
    ///
    /// # Errors
    ///
    /// [`KernelError::ResourceExhausted`] when memory is not available.
    fn create_mutex(&self) -> KernelResult<MutexHandle>;

    /// Take the mutex, blocking up to `timeout` ticks.
    ///
    /// # Errors
    ///
    /// [`KernelError::Timeout`] if the mutex was not released in time.
    fn acquire(&self, mutex: MutexHandle, timeout: Ticks) -> KernelResult<()>;

    /// Give back a mutex held by the calling task.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotOwner`] if the caller does not hold it.
    fn release(&self, mutex: MutexHandle) -> KernelResult<()>;

    /// Block the calling task for `ticks` ticks (0 yields).
    ///
    /// # Errors
    ///
    /// [`KernelError::NotInTask`] outside a task body.
    fn delay(&self, ticks: Ticks) -> KernelResult<()>;

    /// Park the calling task permanently.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotInTask`] outside a task body.
    fn suspend(&self) -> KernelResult<()>;

    /// Current state of a live task, `None` once deleted or exited.
    fn task_state(&self, task: TaskHandle) -> Option<TaskState>;
}

/// Kernel call failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Not enough kernel memory.
    #[error("resource exhausted: requested {requested} bytes, {available} available")]
    ResourceExhausted {
        /// Bytes requested.
        requested: usize,
        /// Bytes left.
        available: usize,
    },

    /// Stack depth of zero words.
    #[error("stack size must be at least one word")]
    InvalidStackSize,

    /// The handle does not name a live task.
    #[error("unknown task {0}")]
    UnknownTask(TaskHandle),

    /// The task holds the processor and cannot be deleted.
    #[error("task {0} is running")]
    TaskRunning(TaskHandle),

    /// The handle does not name a mutex.
    #[error("unknown mutex {0}")]
    UnknownMutex(MutexHandle),

    /// Acquisition did not succeed within the timeout.
    #[error("timed out after {ticks} ticks")]
    Timeout {
        /// Timeout that expired.
        ticks: Ticks,
    },

    /// Release by a task that does not hold the mutex.
    #[error("caller does not own {0}")]
    NotOwner(MutexHandle),

    /// Acquire by the task that already holds the mutex.
    #[error("caller already owns {0}")]
    AlreadyOwner(MutexHandle),

    /// A task-only call was made outside a task body.
    #[error("call requires a task context")]
    NotInTask,

    /// The scheduler was already started.
    #[error("scheduler already started")]
    SchedulerRunning,

    /// The scheduler reached steady state; no task will run again.
    #[error("scheduler stopped")]
    SchedulerStopped,

    /// Stack usage beyond the allocation.
    #[error("stack overflow in {task}: {used} bytes used, {limit} allocated")]
    StackOverflow {
        /// Offending task.
        task: TaskHandle,
        /// Bytes in use at detection.
        used: usize,
        /// Bytes allocated.
        limit: usize,
    },

    /// A fault disabled scheduling.
    #[error("kernel halted: {0}")]
    Halted(FaultKind),

    /// The host could not provide an execution context for a task.
    #[error("failed to spawn task thread: {0}")]
    Spawn(String),

    /// The configured CPU affinity could not be applied.
    #[error("invalid CPU affinity: {0}")]
    Affinity(String),
}

/// Convenience type alias for kernel calls.
pub type KernelResult<T> = Result<T, KernelError>;

impl From<KernelError> for BenchError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::ResourceExhausted { .. } => BenchError::ResourceExhausted(err.to_string()),
            KernelError::StackOverflow { task, .. } => BenchError::StackOverflow {
                task: task.to_string(),
            },
            KernelError::Halted(fault) => BenchError::Halted(fault.to_string()),
            KernelError::Affinity(msg) => BenchError::Config(msg),
            other => BenchError::Kernel(other.to_string()),
        }
    }
}
