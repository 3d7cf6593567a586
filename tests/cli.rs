mod common;

use std::fs;
use std::process::{Command, Stdio};

use common::temp_git_repo;

/// Run the binary with arbitrary args from a working directory.
fn run_in(dir: &std::path::Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_ketchup"))
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to spawn binary");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[test]
fn status_prints_default_state() {
    let repo = temp_git_repo();
    let (code, stdout, _) = run_in(repo.path(), &["status"]);
    assert_eq!(code, 0);
    let state: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(state["autoContinue"]["mode"], "smart");
    assert_eq!(state["autoContinue"]["skipModes"], serde_json::json!(["plan"]));
    assert_eq!(state["validateCommit"]["mode"], "strict");
    assert_eq!(state["denyList"]["enabled"], true);
    assert_eq!(state["promptReminder"]["enabled"], true);
}

#[test]
fn status_bootstraps_the_state_file() {
    let repo = temp_git_repo();
    assert!(!repo.path().join(".ketchup/state.json").exists());
    let (code, _, _) = run_in(repo.path(), &["status"]);
    assert_eq!(code, 0);
    assert!(repo.path().join(".ketchup/state.json").exists());
}

#[test]
fn status_reflects_persisted_overrides() {
    let repo = temp_git_repo();
    let data_dir = repo.path().join(".ketchup");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("state.json"),
        r#"{"validateCommit": {"mode": "warn", "batchCount": 1}}"#,
    )
    .unwrap();

    let (code, stdout, _) = run_in(repo.path(), &["status"]);
    assert_eq!(code, 0);
    let state: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(state["validateCommit"]["mode"], "warn");
    assert_eq!(state["validateCommit"]["batchCount"], 1);
    // Absent sections are reported at defaults.
    assert_eq!(state["autoContinue"]["mode"], "smart");
}

#[test]
fn status_outside_a_repo_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_in(dir.path(), &["status"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("finding git repo"), "stderr was: {stderr}");
}

#[test]
fn unknown_subcommand_is_rejected() {
    let repo = temp_git_repo();
    let (code, _, _) = run_in(repo.path(), &["frobnicate"]);
    assert_ne!(code, 0);
}

#[test]
fn missing_subcommand_is_rejected() {
    let repo = temp_git_repo();
    let (code, _, _) = run_in(repo.path(), &[]);
    assert_ne!(code, 0);
}
