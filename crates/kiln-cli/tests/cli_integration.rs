//! CLI subprocess integration tests.
//!
//! These invoke the `kiln` binary as a subprocess against temp directories
//! and verify exit codes, stdout content, and the state file left behind.

use std::path::{Path, PathBuf};
use std::process::Command;

fn kiln_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
}

fn write_plan(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("kiln-plan.json");
    std::fs::write(&path, content).unwrap();
    path
}

fn good_plan() -> &'static str {
    r#"{
        "builds": [
            {
                "name": "web",
                "provisioners": [
                    {"name": "setup", "command": ["true"]},
                    {"name": "configure", "command": ["true"]}
                ],
                "artifacts": [{"id": "img-web", "files": ["out/web.img"]}]
            }
        ],
        "variables": {"region": "eu-west-1"}
    }"#
}

fn state_path(dir: &Path) -> PathBuf {
    dir.join(".kiln").join("builder-state.json")
}

fn read_state(dir: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(state_path(dir)).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn version_exits_zero() {
    let out = kiln_bin().arg("--version").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("kiln"));
}

#[test]
fn build_creates_state_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());

    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Builds finished"));
    assert!(stdout.contains("img-web"));

    let state = read_state(dir.path());
    assert_eq!(state["version"], 1);
    assert_eq!(state["builds"]["web"]["status"], "complete");
    let lock = PathBuf::from(format!("{}.lock", state_path(dir.path()).display()));
    assert!(!lock.exists(), "lock must be released after the build");
}

#[test]
fn rerun_with_unchanged_inputs_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());

    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());
    let serial_before = read_state(dir.path())["serial"].clone();

    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Nothing to do"));
    assert_eq!(read_state(dir.path())["serial"], serial_before);
}

#[test]
fn changed_variable_triggers_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());

    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());

    let out = kiln_bin()
        .arg("build")
        .arg(&plan)
        .arg("--var")
        .arg("region=us-east-1")
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("inputs changed"), "stdout: {stdout}");

    let state = read_state(dir.path());
    assert_eq!(state["template"]["variables"]["region"], "us-east-1");
    assert_eq!(state["builds"]["web"]["status"], "complete");
}

#[test]
fn failing_step_exits_nonzero_and_resume_completes() {
    let dir = tempfile::tempdir().unwrap();
    let broken = r#"{
        "builds": [
            {
                "name": "web",
                "provisioners": [
                    {"name": "setup", "command": ["true"]},
                    {"name": "configure", "command": ["sh", "-c", "exit 7"]}
                ]
            }
        ]
    }"#;
    let plan = write_plan(dir.path(), broken);

    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed"));

    let state = read_state(dir.path());
    assert_eq!(state["builds"]["web"]["status"], "failed");
    assert_eq!(
        state["builds"]["web"]["provisioners"][0]["status"],
        "complete"
    );
    assert_eq!(state["builds"]["web"]["provisioners"][1]["status"], "failed");

    // Fixing the step rewrites the plan file, which changes the template
    // hash, so either a resume or a full rebuild is acceptable here.
    // Assert only on the final recorded outcome.
    let fixed = broken.replace("exit 7", "exit 0");
    write_plan(dir.path(), &fixed);
    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let state = read_state(dir.path());
    assert_eq!(state["builds"]["web"]["status"], "complete");
}

#[test]
fn state_show_renders_builds() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());

    let out = kiln_bin()
        .arg("--state")
        .arg(state_path(dir.path()))
        .arg("state")
        .arg("show")
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("web:"));
    assert!(stdout.contains("complete"));
    assert!(stdout.contains("Provisioners: 2/2 complete"));
}

#[test]
fn state_show_json_is_the_raw_document() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());

    let out = kiln_bin()
        .arg("--state")
        .arg(state_path(dir.path()))
        .arg("state")
        .arg("show")
        .arg("--json")
        .output()
        .unwrap();
    assert!(out.status.success());
    let doc: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("stdout must be valid JSON");
    assert_eq!(doc["builds"]["web"]["status"], "complete");
}

#[test]
fn state_show_without_file_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = kiln_bin()
        .arg("--state")
        .arg(dir.path().join("absent.json"))
        .arg("state")
        .arg("show")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("No state file found"));
}

#[test]
fn state_rm_removes_a_build() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());

    let out = kiln_bin()
        .arg("--state")
        .arg(state_path(dir.path()))
        .arg("state")
        .arg("rm")
        .arg("web")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Removed build 'web'"));

    let state = read_state(dir.path());
    assert!(state["builds"].as_object().unwrap().is_empty());
}

#[test]
fn state_rm_unknown_build_fails() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());

    let out = kiln_bin()
        .arg("--state")
        .arg(state_path(dir.path()))
        .arg("state")
        .arg("rm")
        .arg("nonexistent")
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn stale_lock_blocks_build_until_unlocked() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    let state = state_path(dir.path());

    std::fs::create_dir_all(state.parent().unwrap()).unwrap();
    let lock_path = PathBuf::from(format!("{}.lock", state.display()));
    std::fs::write(
        &lock_path,
        r#"{"id": "dead-session", "operation": "build", "who": "ghost@nowhere",
           "created": "2026-01-01T00:00:00Z", "path": "state"}"#,
    )
    .unwrap();

    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("ghost@nowhere"));

    let out = kiln_bin()
        .arg("--state")
        .arg(&state)
        .arg("state")
        .arg("unlock")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(!lock_path.exists());

    assert!(kiln_bin().arg("build").arg(&plan).output().unwrap().status.success());
}

#[test]
fn corrupt_state_file_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path(), good_plan());
    std::fs::create_dir_all(state_path(dir.path()).parent().unwrap()).unwrap();
    std::fs::write(state_path(dir.path()), "{ definitely not json").unwrap();

    let out = kiln_bin().arg("build").arg(&plan).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("corrupt"));
}

#[test]
fn completions_generate_for_bash() {
    let out = kiln_bin().arg("completions").arg("bash").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("kiln"));
}
