//! Integration tests for rtos-bench acceptance testing.

mod common;
mod fault_test;
mod handoff_test;
mod report_test;
mod sweep_test;
