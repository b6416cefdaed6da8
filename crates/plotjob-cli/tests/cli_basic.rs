//! Basic CLI E2E tests.
//!
//! Tests invoke the binary via cargo run against an isolated data
//! directory per test and verify JSON outputs and exit codes.

use std::path::Path;
use std::process::Command;

fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .args(["run", "-p", "plotjob-cli", "--"])
        .args(args)
        .env("PLOTJOB_DATA_DIR", data_dir)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn submit(data_dir: &Path) -> (String, tempfile::NamedTempFile) {
    let source = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(source.path(), "<svg><path d=\"M0 0 L1 1\"/></svg>").unwrap();
    let source_path = source.path().to_string_lossy().into_owned();

    let (stdout, stderr, code) = run_cli(data_dir, &["job", "submit", &source_path]);
    assert_eq!(code, 0, "submit failed: {stderr}");
    let job: serde_json::Value = serde_json::from_str(&stdout).expect("submit output is JSON");
    (job["id"].as_str().unwrap().to_string(), source)
}

#[test]
fn submit_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());

    let (stdout, _, code) = run_cli(dir.path(), &["job", "list"]);
    assert_eq!(code, 0);
    let jobs: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(jobs[0]["id"], id.as_str());
    assert_eq!(jobs[0]["state"], "new");
}

#[test]
fn lifecycle_to_completed() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());

    for verb in ["queue", "analyze", "optimize", "ready"] {
        let (_, stderr, code) = run_cli(dir.path(), &[verb, &id]);
        assert_eq!(code, 0, "{verb} failed: {stderr}");
    }
    // Default guard config: no paper session etc., so arm needs the probe
    // flags to satisfy the shipped guards.
    let (stdout, stderr, code) = run_cli(
        dir.path(),
        &["arm", &id, "--confirm-setup", "--paper-session", "bed-1"],
    );
    assert_eq!(code, 0, "arm failed: {stderr}");
    let job: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["state"], "armed");

    for (verb, expected) in [("start", "plotting"), ("complete", "completed")] {
        let (stdout, stderr, code) = run_cli(dir.path(), &[verb, &id]);
        assert_eq!(code, 0, "{verb} failed: {stderr}");
        let job: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        assert_eq!(job["state"], expected);
    }

    // The journal carries the whole story.
    let (stdout, _, code) = run_cli(dir.path(), &["job", "journal", &id]);
    assert_eq!(code, 0);
    let records: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let states: Vec<_> = records
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["type"] == "state_change")
        .map(|r| r["to"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(states.last().map(String::as_str), Some("completed"));
}

#[test]
fn illegal_transition_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());

    let (_, stderr, code) = run_cli(dir.path(), &["start", &id]);
    assert_eq!(code, 2, "start from new must exit 2");
    assert!(stderr.contains("Illegal transition"));
}

#[test]
fn guard_blocked_arm_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());
    for verb in ["queue", "analyze", "optimize", "ready"] {
        run_cli(dir.path(), &[verb, &id]);
    }

    // No --paper-session and no --confirm-setup: both guards fail.
    let (_, stderr, code) = run_cli(dir.path(), &["arm", &id]);
    assert_eq!(code, 3, "blocked arm must exit 3: {stderr}");
    assert!(stderr.contains("paper_session"));

    let (stdout, _, _) = run_cli(dir.path(), &["job", "show", &id]);
    let job: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["state"], "ready");
}

#[test]
fn recover_lists_interrupted_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());
    for verb in ["queue", "analyze", "optimize", "ready"] {
        run_cli(dir.path(), &[verb, &id]);
    }
    run_cli(
        dir.path(),
        &["arm", &id, "--confirm-setup", "--paper-session", "bed-1"],
    );
    run_cli(dir.path(), &["start", &id]);
    // The process holding the plot is "gone" now; the next invocation
    // plays the part of the post-crash startup.

    let (stdout, _, code) = run_cli(dir.path(), &["recover", "list"]);
    assert_eq!(code, 0);
    let findings: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let finding = findings
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["job"]["id"] == id.as_str())
        .expect("interrupted job in scan");
    assert_eq!(finding["interrupted"], true);

    let (stdout, stderr, code) =
        run_cli(dir.path(), &["recover", "dispose", &id, "requeue-front"]);
    assert_eq!(code, 0, "dispose failed: {stderr}");
    let job: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["state"], "queued");
}

#[test]
fn restart_requires_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let (id, _source) = submit(dir.path());

    let (_, _, code) = run_cli(dir.path(), &["restart", &id]);
    assert_eq!(code, 2, "restart of a NEW job must exit 2");

    run_cli(dir.path(), &["fail", &id, "--reason", "belt slipped"]);
    let (stdout, _, code) = run_cli(dir.path(), &["restart", &id]);
    assert_eq!(code, 0);
    let job: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["state"], "queued");
    assert!(job["error_message"].is_null());
}

#[test]
fn config_show_and_path() {
    let dir = tempfile::tempdir().unwrap();

    let (stdout, _, code) = run_cli(dir.path(), &["config", "show"]);
    assert_eq!(code, 0);
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["guards"]["paper_session"]["enabled"], true);
    assert_eq!(config["device"]["model"], "axidraw-v3");

    let (stdout, _, code) = run_cli(dir.path(), &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().ends_with("config.toml"));
}
