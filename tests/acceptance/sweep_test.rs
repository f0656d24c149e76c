//! Stack-size sweep acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Creation cost does not decrease with stack depth beyond noise
//! - Sweep lines follow the single-shot lifecycle lines and precede the
//!   scheduler-driven lines

use super::common::{count, fast_config, position, run};
use bench_common::state::RunState;

#[test]
fn test_creation_cost_grows_with_stack() {
    let mut config = fast_config();
    config.sweep.enabled = true;
    config.sweep.stack_sizes = vec![64, 8192];
    config.sweep.iterations = 16;

    let out = run(config);
    assert_eq!(out.summary.state, RunState::SteadyState);

    let sweep = out.summary.sweep.unwrap();
    assert_eq!(sweep.points.len(), 2);
    assert!(sweep.is_monotonic(0.5), "{sweep:?}");
}

#[test]
fn test_sweep_lines_are_placed_between_phases() {
    let mut config = fast_config();
    config.sweep.enabled = true;
    config.sweep.stack_sizes = vec![128, 256, 512];
    config.sweep.iterations = 4;

    let out = run(config);

    assert_eq!(count(&out.lines, "Task Creation Time [stack "), 3);
    assert_eq!(count(&out.lines, "Task Deletion Time [stack "), 3);

    let first = position(&out.lines, "Task Creation Time [stack 128]: min ").unwrap();
    let deletion = position(&out.lines, "Task Deletion Time: ").unwrap();
    let switch = position(&out.lines, "Context Switching Time: ").unwrap();
    assert!(deletion < first);
    assert!(first < switch);
}
