#![doc = "Common types shared across the rtos-bench workspace."]

pub mod config;
pub mod cycles;
pub mod error;
pub mod metrics;
pub mod state;

pub use config::*;
pub use cycles::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
