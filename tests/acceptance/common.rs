//! Shared helpers for acceptance tests.

#![allow(dead_code)] // Not every helper is used by every test module

use bench_common::config::{BenchConfig, CpuAffinity, KernelConfig};
use bench_harness::{HaltingFaultHandler, Harness, MemoryReporter, RunSummary};
use bench_kernel::SimKernel;
use std::sync::Arc;
use std::time::Duration;

/// Kernel settings that keep a full run well under a second.
pub fn fast_kernel_config() -> KernelConfig {
    KernelConfig {
        tick_period: Duration::from_micros(100),
        cpu_affinity: CpuAffinity::None,
        ..KernelConfig::default()
    }
}

/// Default benchmark parameters with short delays.
pub fn fast_config() -> BenchConfig {
    let mut config = BenchConfig::default();
    config.kernel = fast_kernel_config();
    config.handoff.switch_delay_ticks = 10;
    config.handoff.settle_delay_ticks = 10;
    config
}

/// Everything a run produced.
pub struct RunOutput {
    pub summary: RunSummary,
    pub lines: Vec<String>,
    pub faults: Arc<HaltingFaultHandler>,
}

/// Run the harness once against a fresh simulated kernel.
pub fn run(config: BenchConfig) -> RunOutput {
    let reporter = Arc::new(MemoryReporter::new());
    let faults = Arc::new(HaltingFaultHandler::with_reporter(reporter.clone()));
    let kernel = Arc::new(SimKernel::new(config.kernel.clone(), faults.clone()));

    let summary = Harness::new(kernel, config, reporter.clone()).run();
    RunOutput {
        summary,
        lines: reporter.rendered(),
        faults,
    }
}

/// Index of the first line starting with `prefix`.
pub fn position(lines: &[String], prefix: &str) -> Option<usize> {
    lines.iter().position(|l| l.starts_with(prefix))
}

/// Number of lines starting with `prefix`.
pub fn count(lines: &[String], prefix: &str) -> usize {
    lines.iter().filter(|l| l.starts_with(prefix)).count()
}

/// Integer value of a `<Label>: <n>` line.
pub fn value(lines: &[String], label: &str) -> Option<u64> {
    let prefix = format!("{label}: ");
    lines
        .iter()
        .find_map(|l| l.strip_prefix(&prefix))
        .and_then(|v| v.parse().ok())
}
