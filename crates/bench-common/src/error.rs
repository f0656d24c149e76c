use thiserror::Error;

/// Benchmark error types covering configuration, kernel faults, and run control.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Task or mutex creation failed for lack of kernel memory.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A task overran its allocated stack.
    #[error("stack overflow in task {task}")]
    StackOverflow {
        /// Name of the offending task.
        task: String,
    },

    /// Kernel call failed.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// The run was halted after a fatal fault.
    #[error("benchmark halted: {0}")]
    Halted(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl BenchError {
    /// Returns true for faults after which no measurement can continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted(_) | Self::StackOverflow { .. } | Self::Halted(_)
        )
    }
}

/// Convenience type alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;
