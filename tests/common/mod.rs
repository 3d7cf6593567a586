use std::io::Write;
use std::process::{Command, Stdio};

/// Run `ketchup hook` with the given stdin, returning (code, stdout, stderr).
pub fn run_cli(stdin_json: &str) -> (i32, String, String) {
    run_cli_env(stdin_json, &[])
}

/// Like `run_cli`, with extra environment variables (e.g. a stub judge).
pub fn run_cli_env(stdin_json: &str, env: &[(&str, &str)]) -> (i32, String, String) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ketchup"));
    cmd.arg("hook")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    let mut child = cmd.spawn().expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin_json.as_bytes())
        .unwrap();

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Create a temp dir containing a git repo with an initial commit and return it.
/// The `TempDir` must be kept alive for the duration of the test.
pub fn temp_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();

    // Configure user identity for commits.
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();

    // Create an initial commit so HEAD exists.
    let sig = repo.signature().unwrap();
    let tree_oid = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    dir
}

pub fn common(cwd: &str, transcript_path: &str) -> String {
    common_with_mode(cwd, transcript_path, "default")
}

pub fn common_with_mode(cwd: &str, transcript_path: &str, mode: &str) -> String {
    format!(
        r#"
    "session_id": "test-session-{}",
    "transcript_path": "{transcript_path}",
    "cwd": "{cwd}",
    "permission_mode": "{mode}"
"#,
        uuid::Uuid::new_v4()
    )
}

/// Write an executable stub judge that ignores its prompt and prints the
/// given output, returning its path.
#[cfg(unix)]
pub fn write_stub_judge(dir: &std::path::Path, output: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("stub-judge.sh");
    std::fs::write(
        &path,
        format!("#!/bin/sh\ncat > /dev/null\necho '{output}'\n"),
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

/// Read the persisted hook state JSON from a repo's data dir.
pub fn read_state(repo_path: &std::path::Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(repo_path.join(".ketchup/state.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Common fields pointing at a non-git /tmp dir (for inputs that fail before
/// the session opens).
pub const COMMON_NO_GIT: &str = r#"
    "session_id": "test-session",
    "transcript_path": "/tmp/t.jsonl",
    "cwd": "/tmp",
    "permission_mode": "default"
"#;
