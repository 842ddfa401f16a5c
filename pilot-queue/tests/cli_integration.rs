//! CLI integration tests for pilot-queue
//!
//! Each test points POSTPILOT_DB_PATH at its own temp database so tests are
//! isolated from the user's queue and from each other.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(temp: &TempDir) -> Command {
    let mut command = Command::cargo_bin("pilot-queue").unwrap();
    command
        .env("POSTPILOT_DB_PATH", temp.path().join("queue.db"))
        .env("POSTPILOT_CONFIG", temp.path().join("missing-config.toml"));
    command
}

#[test]
fn test_help_shows_commands() {
    Command::cargo_bin("pilot-queue")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Manage the scheduled dispatch queue"))
        .stdout(predicate::str::contains("enqueue"))
        .stdout(predicate::str::contains("tick"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("pilot-queue")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pilot-queue"));
}

#[test]
fn test_enqueue_and_list() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["enqueue", "Hello from the queue", "--platform", "x", "--at", "2h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued job"));

    cmd(&temp)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"))
        .stdout(predicate::str::contains("x"));
}

#[test]
fn test_list_json_format() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["enqueue", "Json body", "--platform", "telegram", "--at", "1h"])
        .assert()
        .success();

    cmd(&temp)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"platform\": \"telegram\""))
        .stdout(predicate::str::contains("\"status\": \"pending\""));
}

#[test]
fn test_unknown_platform_rejected() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["enqueue", "Body", "--platform", "myspace"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unknown platform"));
}

#[test]
fn test_invalid_format_rejected() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["list", "--format", "yaml"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[test]
fn test_cancel_pending_job() {
    let temp = TempDir::new().unwrap();

    let output = cmd(&temp)
        .args(["enqueue", "Cancel me", "--platform", "x", "--at", "3h"])
        .output()
        .unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    // "Enqueued job <id> for x at ..."
    let job_id = stdout
        .split_whitespace()
        .nth(2)
        .expect("job id in output")
        .to_string();

    cmd(&temp)
        .args(["cancel", &job_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled job"));

    // Cancelling a cancelled job is an invalid transition
    cmd(&temp)
        .args(["cancel", &job_id])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("cannot cancel"));
}

#[test]
fn test_cancel_unknown_job() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["cancel", "no-such-job"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_tick_reports_counts() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["enqueue", "Tick me", "--platform", "x"])
        .assert()
        .success();

    cmd(&temp)
        .args(["tick"])
        .assert()
        .success()
        .stdout(predicate::str::contains("processed:"));
}

#[test]
fn test_stats_output() {
    let temp = TempDir::new().unwrap();

    cmd(&temp)
        .args(["stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("quota usage"))
        .stdout(predicate::str::contains("queue:"));

    cmd(&temp)
        .args(["stats", "--platform", "x", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"quota\""));
}

#[test]
fn test_reschedule_pending_job() {
    let temp = TempDir::new().unwrap();

    let output = cmd(&temp)
        .args(["enqueue", "Move me", "--platform", "x", "--at", "1h"])
        .output()
        .unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    let job_id = stdout
        .split_whitespace()
        .nth(2)
        .expect("job id in output")
        .to_string();

    cmd(&temp)
        .args(["reschedule", &job_id, "4h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rescheduled job"));
}
