use super::*;
use serde_json::json;
use std::path::{Path, PathBuf};

// ===================================================================
// Test helpers
// ===================================================================

fn lines(values: &[serde_json::Value]) -> String {
    values
        .iter()
        .map(|v| serde_json::to_string(v).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn user_text(ts: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "user",
        "timestamp": ts,
        "cwd": "/work/project",
        "message": { "role": "user", "content": text }
    })
}

fn assistant_text(ts: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "assistant",
        "timestamp": ts,
        "cwd": "/work/project",
        "message": {
            "role": "assistant",
            "content": [{ "type": "text", "text": text }]
        }
    })
}

fn assistant_tool_use(ts: &str, input: serde_json::Value) -> serde_json::Value {
    tool_use_named(ts, "Edit", input)
}

fn tool_use_named(ts: &str, name: &str, input: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "assistant",
        "timestamp": ts,
        "message": {
            "role": "assistant",
            "content": [{ "type": "tool_use", "id": "toolu_1", "name": name, "input": input }]
        }
    })
}

fn clues_of_kind(collected: &CollectedClues, kind: ClueKind) -> Vec<&Clue> {
    collected.clues.iter().filter(|c| c.kind == kind).collect()
}

// ===================================================================
// Session cwd + working dirs
// ===================================================================

#[test]
fn session_cwd_is_last_write_wins() {
    let contents = lines(&[
        json!({"type": "user", "cwd": "/first", "message": {"role": "user", "content": "a"}}),
        json!({"type": "assistant", "cwd": "/second",
               "message": {"role": "assistant", "content": [{"type": "text", "text": "b"}]}}),
        json!({"type": "system", "cwd": "/third"}),
    ]);
    let collected = scan(&contents);
    assert_eq!(collected.session_cwd.as_deref(), Some(Path::new("/third")));
}

#[test]
fn tool_use_file_path_yields_working_dir() {
    let contents = lines(&[assistant_tool_use(
        "2025-06-01T10:00:00Z",
        json!({"file_path": "/work/project/src/lib.rs", "old_string": "a", "new_string": "b"}),
    )]);
    let collected = scan(&contents);
    assert_eq!(
        collected.working_dirs,
        vec![PathBuf::from("/work/project/src")]
    );
    assert!(collected.ketchup_plan_paths.is_empty());
}

#[test]
fn cd_prefix_extracts_absolute_working_dir() {
    let contents = lines(&[
        tool_use_named("t1", "Bash", json!({"command": "cd /srv/app && make test"})),
        tool_use_named("t2", "Bash", json!({"command": "cd \"/srv/with space\" && ls"})),
        tool_use_named("t3", "Bash", json!({"command": "cd relative/dir && ls"})),
        tool_use_named("t4", "Bash", json!({"command": "ls /tmp"})),
    ]);
    let collected = scan(&contents);
    assert_eq!(
        collected.working_dirs,
        vec![PathBuf::from("/srv/app"), PathBuf::from("/srv/with space")]
    );
}

#[test]
fn non_shell_tools_do_not_contribute_cd_dirs() {
    let contents = lines(&[tool_use_named(
        "t1",
        "Edit",
        json!({"command": "cd /srv/app && make"}),
    )]);
    let collected = scan(&contents);
    assert!(collected.working_dirs.is_empty());
}

// ===================================================================
// Plan path extraction
// ===================================================================

#[test]
fn plan_path_from_tool_use_is_case_insensitive() {
    let contents = lines(&[assistant_tool_use(
        "t1",
        json!({"notebook_path": "/work/proj/KETCHUP-PLAN.md"}),
    )]);
    let collected = scan(&contents);
    assert_eq!(
        collected.ketchup_plan_paths,
        vec![PathBuf::from("/work/proj/KETCHUP-PLAN.md")]
    );
    assert_eq!(collected.working_dirs, vec![PathBuf::from("/work/proj")]);
}

#[test]
fn plan_path_found_in_free_text() {
    let contents = lines(&[assistant_text(
        "t1",
        "Tracking progress in /work/proj/ketchup-plan.md as agreed.",
    )]);
    let collected = scan(&contents);
    assert_eq!(
        collected.ketchup_plan_paths,
        vec![PathBuf::from("/work/proj/ketchup-plan.md")]
    );
}

#[test]
fn duplicate_plan_paths_are_deduplicated() {
    let contents = lines(&[
        assistant_tool_use("t1", json!({"file_path": "/p/ketchup-plan.md"})),
        assistant_tool_use("t2", json!({"file_path": "/p/ketchup-plan.md"})),
    ]);
    let collected = scan(&contents);
    assert_eq!(collected.ketchup_plan_paths.len(), 1);
}

// ===================================================================
// Pattern clues
// ===================================================================

#[test]
fn first_matching_rule_wins_per_message() {
    // Matches both "continue-intent" and "not-done"; only the first rule
    // in declaration order produces a clue.
    let contents = lines(&[assistant_text(
        "2025-06-01T10:00:00Z",
        "I'll continue with the refactor since it is not done yet.",
    )]);
    let collected = scan(&contents);
    let patterns = clues_of_kind(&collected, ClueKind::Pattern);
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].matched_pattern.as_deref(), Some("continue-intent"));
}

#[test]
fn user_text_never_produces_pattern_clues() {
    let contents = lines(&[user_text(
        "t1",
        "I'll continue tomorrow, there is remaining work",
    )]);
    let collected = scan(&contents);
    assert!(clues_of_kind(&collected, ClueKind::Pattern).is_empty());
}

#[test]
fn one_message_can_yield_three_clue_kinds() {
    let contents = lines(&[assistant_text(
        "2025-06-01T10:00:00Z",
        "I'll continue working through the ketchup plan now.",
    )]);
    let collected = scan(&contents);
    assert_eq!(collected.clues.len(), 3);
    assert_eq!(clues_of_kind(&collected, ClueKind::Pattern).len(), 1);
    assert_eq!(clues_of_kind(&collected, ClueKind::Ketchup).len(), 1);
    assert_eq!(clues_of_kind(&collected, ClueKind::Plan).len(), 1);
}

#[test]
fn ketchup_clue_from_user_text_records_source() {
    let contents = lines(&[user_text("t1", "please update the ketchup file")]);
    let collected = scan(&contents);
    let ketchup = clues_of_kind(&collected, ClueKind::Ketchup);
    assert_eq!(ketchup.len(), 1);
    assert_eq!(ketchup[0].source, ClueSource::User);
}

#[test]
fn plan_word_requires_word_boundary() {
    let contents = lines(&[assistant_text("t1", "flying in a seaplane today")]);
    let collected = scan(&contents);
    assert!(clues_of_kind(&collected, ClueKind::Plan).is_empty());
}

// ===================================================================
// Caps + truncation + ordering
// ===================================================================

#[test]
fn pattern_clues_cap_at_ten_most_recent() {
    let entries: Vec<serde_json::Value> = (0..13)
        .map(|i| {
            assistant_text(
                &format!("2025-06-01T10:00:{i:02}Z"),
                &format!("Still need to finish task number {i}"),
            )
        })
        .collect();
    let collected = scan(&lines(&entries));
    let patterns = clues_of_kind(&collected, ClueKind::Pattern);
    assert_eq!(patterns.len(), 10);
    // Oldest three evicted; the survivors are 3..=12 ascending.
    assert_eq!(patterns[0].timestamp, "2025-06-01T10:00:03Z");
    assert_eq!(patterns[9].timestamp, "2025-06-01T10:00:12Z");
}

#[test]
fn long_clue_text_is_truncated_with_ellipsis() {
    let long = format!("I'll continue. {}", "x".repeat(400));
    let contents = lines(&[assistant_text("t1", &long)]);
    let collected = scan(&contents);
    let patterns = clues_of_kind(&collected, ClueKind::Pattern);
    let text = &patterns[0].text;
    assert!(text.chars().count() <= CLUE_TEXT_MAX + 3);
    assert!(text.ends_with("..."));
}

#[test]
fn short_clue_text_is_not_truncated() {
    let contents = lines(&[assistant_text("t1", "I'll continue.")]);
    let collected = scan(&contents);
    assert_eq!(collected.clues[0].text, "I'll continue.");
}

#[test]
fn merged_clues_sort_ascending_by_timestamp() {
    let contents = lines(&[
        assistant_text("2025-06-01T10:00:05Z", "the ketchup file"),
        assistant_text("2025-06-01T10:00:01Z", "I'll continue shortly"),
        assistant_text("2025-06-01T10:00:03Z", "revisit the plan"),
    ]);
    let collected = scan(&contents);
    let stamps: Vec<&str> = collected.clues.iter().map(|c| c.timestamp.as_str()).collect();
    assert_eq!(
        stamps,
        vec![
            "2025-06-01T10:00:01Z",
            "2025-06-01T10:00:03Z",
            "2025-06-01T10:00:05Z"
        ]
    );
}

// ===================================================================
// Chat pairing
// ===================================================================

#[test]
fn consecutive_assistant_messages_produce_one_exchange() {
    let contents = lines(&[
        user_text("t1", "question A"),
        assistant_text("t2", "answer X"),
        assistant_text("t3", "answer Y"),
    ]);
    let collected = scan(&contents);
    assert_eq!(collected.last_chats.len(), 1);
    assert_eq!(collected.last_chats[0].user, "question A");
    assert_eq!(collected.last_chats[0].assistant, "answer X");
}

#[test]
fn consecutive_user_messages_keep_only_the_latest_pending() {
    let contents = lines(&[
        user_text("t1", "first question"),
        user_text("t2", "second question"),
        assistant_text("t3", "answer"),
    ]);
    let collected = scan(&contents);
    assert_eq!(collected.last_chats.len(), 1);
    assert_eq!(collected.last_chats[0].user, "second question");
}

#[test]
fn exchanges_cap_at_five_most_recent() {
    let mut entries = Vec::new();
    for i in 0..8 {
        entries.push(user_text(&format!("t{}", i * 2), &format!("q{i}")));
        entries.push(assistant_text(&format!("t{}", i * 2 + 1), &format!("a{i}")));
    }
    let collected = scan(&lines(&entries));
    assert_eq!(collected.last_chats.len(), 5);
    assert_eq!(collected.last_chats[0].user, "q3");
    assert_eq!(collected.last_chats[4].user, "q7");
}

// ===================================================================
// Degraded inputs
// ===================================================================

#[test]
fn unparsable_lines_are_skipped_not_fatal() {
    let good = serde_json::to_string(&assistant_text("t1", "I'll continue")).unwrap();
    let contents = format!("{{broken json\n{good}\nnot json at all\n");
    let collected = scan(&contents);
    assert_eq!(collected.clues.len(), 1);
    assert!(
        collected.summary.contains("2 unparsable lines skipped"),
        "summary was: {}",
        collected.summary
    );
}

#[test]
fn entries_missing_all_fields_still_scan() {
    let contents = lines(&[json!({}), json!({"type": "summary"})]);
    let collected = scan(&contents);
    assert!(collected.clues.is_empty());
    assert!(collected.session_cwd.is_none());
}

#[test]
fn missing_transcript_returns_empty_result_with_error_summary() {
    let collected = collect_clues(Path::new("/nonexistent/path/transcript.jsonl"));
    assert!(collected.clues.is_empty());
    assert!(collected.last_chats.is_empty());
    assert!(
        collected.summary.contains("transcript unreadable"),
        "summary was: {}",
        collected.summary
    );
}

#[test]
fn summary_counts_each_clue_type() {
    let contents = lines(&[
        assistant_text("t1", "I'll continue with the ketchup plan"),
        user_text("t2", "ok"),
    ]);
    let collected = scan(&contents);
    assert!(
        collected.summary.contains("3 clues (1 pattern, 1 ketchup, 1 plan)"),
        "summary was: {}",
        collected.summary
    );
}
