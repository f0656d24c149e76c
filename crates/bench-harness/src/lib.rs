#![doc = "Measurement harness for the RTOS micro-benchmarks."]

pub mod boot;
pub mod fault;
pub mod handoff;
pub mod harness;
pub mod lifecycle;
pub mod probe;
pub mod reporter;
pub mod sweep;

pub use boot::*;
pub use fault::*;
pub use handoff::*;
pub use harness::*;
pub use lifecycle::*;
pub use probe::*;
pub use reporter::*;
pub use sweep::*;
