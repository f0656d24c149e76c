//! Report order and content of a complete run.
//!
//! # Acceptance Criteria
//!
//! - Boot, creation, stack size and deletion lines come first, in order
//! - Creation and deletion are reported exactly once, before any
//!   context switch line
//! - Every measured quantity is reported and the run reaches steady state

use super::common::{count, fast_config, position, run, value};
use bench_common::config::BenchConfig;
use bench_common::state::RunState;

#[test]
fn test_lifecycle_lines_precede_scheduler() {
    let out = run(fast_config());

    assert!(out.lines[0].starts_with("Boot Time: "));
    assert!(out.lines[1].starts_with("Task Creation Time: "));
    assert_eq!(out.lines[2], "Task Creation Stack Size: 1024");
    assert!(out.lines[3].starts_with("Task Deletion Time: "));

    assert_eq!(count(&out.lines, "Task Creation Time: "), 1);
    assert_eq!(count(&out.lines, "Task Deletion Time: "), 1);

    let deletion = position(&out.lines, "Task Deletion Time: ").unwrap();
    let switch = position(&out.lines, "Context Switching Time: ").unwrap();
    assert!(deletion < switch);
}

#[test]
fn test_complete_run_reports_every_quantity() {
    let out = run(fast_config());

    assert_eq!(out.summary.state, RunState::SteadyState);
    assert!(out.summary.error.is_none());
    assert!(out.faults.faults().is_empty());

    assert!(value(&out.lines, "Boot Time").is_some());
    assert!(value(&out.lines, "Task Creation Time").unwrap() > 0);
    assert!(value(&out.lines, "Task Deletion Time").unwrap() > 0);
    assert!(value(&out.lines, "Context Switching Time").is_some());
    assert!(value(&out.lines, "Mutex Lock Time").is_some());
    assert!(value(&out.lines, "Mutex Unlock Time").is_some());

    let expected = [
        "This is Task 2.",
        "Context Switching Time: ",
        "This is Task 3.",
        "Mutex Lock Time: ",
        "Mutex Unlock Time: ",
    ];
    let tail = &out.lines[out.lines.len() - expected.len()..];
    for (line, prefix) in tail.iter().zip(expected) {
        assert!(line.starts_with(prefix), "{line:?} should start with {prefix:?}");
    }
}

#[test]
fn test_state_history_is_complete() {
    let out = run(fast_config());
    assert_eq!(
        out.summary.history,
        vec![
            RunState::Boot,
            RunState::TaskCreateMeasured,
            RunState::TaskDeleteMeasured,
            RunState::SchedulerStarted,
            RunState::ContextSwitchMeasured,
            RunState::MutexLockMeasured,
            RunState::MutexUnlockMeasured,
            RunState::SteadyState,
        ]
    );
}

#[test]
fn test_configured_stack_size_is_reported() {
    let mut config = fast_config();
    config.lifecycle.stack_size = 256;

    let out = run(config);
    assert_eq!(value(&out.lines, "Task Creation Stack Size"), Some(256));
    assert_eq!(out.summary.creation_stack_size, 256);
}

#[test]
fn test_shipped_config_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = BenchConfig::from_file(&path).unwrap();

    assert_eq!(config.lifecycle.stack_size, 1024);
    assert_eq!(config.handoff.switch_delay_ticks, 1000);
    assert_eq!(config.handoff.lock_timeout_ticks, 0x0FFF_FFFF);
    assert!(!config.sweep.enabled);
}

#[test]
fn test_run_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.toml");
    std::fs::write(
        &path,
        r#"
            [lifecycle]
            stack_size = 512

            [handoff]
            switch_delay_ticks = 5
            settle_delay_ticks = 5

            [kernel]
            tick_period = "100us"
            cpu_affinity = []
        "#,
    )
    .unwrap();

    let config = BenchConfig::from_file(&path).unwrap();
    let out = run(config);

    assert_eq!(out.summary.state, RunState::SteadyState);
    assert_eq!(value(&out.lines, "Task Creation Stack Size"), Some(512));
    assert_eq!(count(&out.lines, "Mutex Unlock Time: "), 1);
}
