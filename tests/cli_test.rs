//! Binary tests for the taskgate CLI

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the user's config and log directories
fn taskgate(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("taskgate").expect("binary should build");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_run_reports_json_stats() {
    let home = TempDir::new().expect("Failed to create temp dir");
    let output = taskgate(&home)
        .args(["run", "--variant", "queued", "-p", "2", "--tasks", "6", "--task-ms", "5", "--format", "json"])
        .output()
        .expect("Failed to run taskgate");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["variant"], "queued");
    assert_eq!(report["finished"], 6);
    assert!(report["stats"]["peak_running"].as_u64().unwrap() <= 2);
}

#[test]
fn test_run_every_variant_in_text() {
    for variant in ["immediate", "queued", "scheduled", "serial"] {
        let home = TempDir::new().expect("Failed to create temp dir");
        taskgate(&home)
            .args(["run", "--variant", variant, "--tasks", "4", "--task-ms", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("taskgate run ({})", variant)))
            .stdout(predicate::str::contains("Finished:"));
    }
}

#[test]
fn test_run_rejects_zero_parallelism() {
    let home = TempDir::new().expect("Failed to create temp dir");
    taskgate(&home)
        .args(["run", "-p", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallelism"));
}

#[test]
fn test_config_reads_local_file() {
    let home = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        home.path().join(".taskgate.yml"),
        "dispatch:\n  variant: serial\n  parallelism: 1\n",
    )
    .expect("Failed to write config");

    taskgate(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("variant: serial"))
        .stdout(predicate::str::contains("task-ms: 50"));
}

#[test]
fn test_unknown_variant_is_usage_error() {
    let home = TempDir::new().expect("Failed to create temp dir");
    taskgate(&home)
        .args(["run", "--variant", "pool"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown executor"));
}
