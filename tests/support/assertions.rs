//! Test assertion helpers.

use std::process::Output;

use cloudkms_plugin::core::metrics::{Metrics, Operation};

/// Assert that a command output failed.
pub fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "Expected command to fail but it succeeded"
    );
}

/// Get stderr as String.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Assert stderr contains a string.
pub fn assert_stderr_contains(output: &Output, expected: &str) {
    let err = stderr(output);
    assert!(
        err.contains(expected),
        "stderr missing '{}', got: {}",
        expected,
        err
    );
}

/// Assert the exposition contains a sample line.
pub fn assert_exposition_contains(body: &str, expected: &str) {
    assert!(
        body.lines().any(|line| line == expected),
        "metrics missing '{}', got:\n{}",
        expected,
        body
    );
}

/// Wait for the latency histogram to reach `count` observations.
///
/// Abandoned calls record their latency when the handler future is
/// dropped, which can land just after the caller sees the error.
pub async fn wait_for_observations(metrics: &Metrics, op: Operation, count: u64) {
    for _ in 0..100 {
        if metrics.observations(op) >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} {} observations, got {}",
        count,
        op.as_str(),
        metrics.observations(op)
    );
}
