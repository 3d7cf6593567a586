mod common;

use std::fs;

use common::{common, run_cli, temp_git_repo};

fn session_start_input(common_fields: &str) -> String {
    format!(
        r#"{{ {common_fields}, "hook_event_name": "SessionStart", "source": "startup" }}"#
    )
}

#[test]
fn warns_when_data_dir_is_not_ignored() {
    let repo = temp_git_repo();
    let cwd = repo.path().to_str().unwrap();

    let (code, stdout, _) = run_cli(&session_start_input(&common(cwd, "/tmp/t.jsonl")));
    assert_eq!(code, 0);
    let output: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let msg = output["systemMessage"].as_str().unwrap();
    assert!(msg.contains(".gitignore"), "expected hygiene warning, got: {msg}");
}

#[test]
fn silent_when_data_dir_is_ignored() {
    let repo = temp_git_repo();
    let cwd = repo.path().to_str().unwrap();
    fs::write(repo.path().join(".gitignore"), ".ketchup\n").unwrap();

    let (code, stdout, _) = run_cli(&session_start_input(&common(cwd, "/tmp/t.jsonl")));
    assert_eq!(code, 0);
    assert!(stdout.is_empty(), "expected no output, got: {stdout}");
}

#[test]
fn session_start_reminders_are_injected() {
    let repo = temp_git_repo();
    let cwd = repo.path().to_str().unwrap();
    fs::write(repo.path().join(".gitignore"), ".ketchup\n").unwrap();
    let reminders = repo.path().join(".ketchup/reminders");
    fs::create_dir_all(&reminders).unwrap();
    fs::write(
        reminders.join("style.md"),
        "---\nname: style\nwhen:\n  hook: SessionStart\n---\nFollow the repo style guide.\n",
    )
    .unwrap();

    let (code, stdout, _) = run_cli(&session_start_input(&common(cwd, "/tmp/t.jsonl")));
    assert_eq!(code, 0);
    let output: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        output["hookSpecificOutput"]["hookEventName"],
        "SessionStart"
    );
    assert_eq!(
        output["hookSpecificOutput"]["additionalContext"],
        "Follow the repo style guide."
    );
}
