use super::*;
use std::fs;
use std::path::{Path, PathBuf};

fn write_plan(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join(PLAN_FILENAME);
    fs::write(&path, contents).unwrap();
    path
}

// =================================================================
// Inspection
// =================================================================

#[test]
fn counts_unchecked_items() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_plan(
        dir.path(),
        "# Plan\n\n- [x] done burst\n- [ ] pending burst\n* [ ] another one\n  - [ ] nested\n",
    );
    let status = inspect(&path).unwrap();
    assert_eq!(status.unchecked, 3);
}

#[test]
fn fully_checked_plan_is_not_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_plan(dir.path(), "# Plan\n\n- [x] one\n- [x] two\n");
    assert!(inspect(&path).is_none());
}

#[test]
fn missing_plan_file_is_none() {
    assert!(inspect(Path::new("/nonexistent/ketchup-plan.md")).is_none());
}

#[test]
fn extracts_first_todo_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_plan(
        dir.path(),
        "# Plan\n\nintro\n\n## TODO\n\n- [ ] first\n- [ ] second\n\n## Done\n\n- [x] old\n\n## TODO later\n\n- [ ] future\n",
    );
    let status = inspect(&path).unwrap();
    let excerpt = status.todo_excerpt.unwrap();
    assert!(excerpt.starts_with("## TODO"));
    assert!(excerpt.contains("- [ ] first"));
    assert!(!excerpt.contains("## Done"));
}

#[test]
fn todo_excerpt_caps_at_500_chars() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = (0..60).map(|i| format!("- [ ] burst {i}\n")).collect();
    let path = write_plan(dir.path(), &format!("## TODO\n{body}"));
    let status = inspect(&path).unwrap();
    assert!(status.todo_excerpt.unwrap().len() <= 500);
}

#[test]
fn plan_without_todo_heading_has_no_excerpt() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_plan(dir.path(), "# Plan\n\n- [ ] a thing\n");
    let status = inspect(&path).unwrap();
    assert_eq!(status.unchecked, 1);
    assert!(status.todo_excerpt.is_none());
}

// =================================================================
// Discovery
// =================================================================

#[test]
fn discovers_plan_from_working_dir_upward() {
    let root = tempfile::tempdir().unwrap();
    write_plan(root.path(), "- [ ] pending\n");
    let nested = root.path().join("a/b/c");
    fs::create_dir_all(&nested).unwrap();

    let statuses = discover(&[], &[nested]);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].unchecked, 1);
}

#[test]
fn upward_walk_is_bounded_to_five_levels() {
    let root = tempfile::tempdir().unwrap();
    write_plan(root.path(), "- [ ] pending\n");
    // Plan sits 6 levels above the working dir: out of reach.
    let nested = root.path().join("a/b/c/d/e/f");
    fs::create_dir_all(&nested).unwrap();

    let statuses = discover(&[], &[nested]);
    assert!(statuses.is_empty());
}

#[test]
fn explicit_paths_precede_working_dir_discovery() {
    let root = tempfile::tempdir().unwrap();
    let explicit_dir = root.path().join("explicit");
    fs::create_dir_all(&explicit_dir).unwrap();
    let explicit = write_plan(&explicit_dir, "- [ ] from explicit\n");

    let wd = root.path().join("wd");
    fs::create_dir_all(&wd).unwrap();
    write_plan(&wd, "- [ ] from working dir\n");

    let statuses = discover(&[explicit.clone()], &[wd]);
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].path, explicit);
}

#[test]
fn same_plan_found_twice_is_inspected_once() {
    let root = tempfile::tempdir().unwrap();
    let path = write_plan(root.path(), "- [ ] pending\n");
    let statuses = discover(&[path], &[root.path().to_path_buf()]);
    assert_eq!(statuses.len(), 1);
}

#[test]
fn total_unchecked_sums_across_plans() {
    let statuses = vec![
        PlanStatus {
            path: PathBuf::from("/a"),
            unchecked: 2,
            todo_excerpt: None,
        },
        PlanStatus {
            path: PathBuf::from("/b"),
            unchecked: 3,
            todo_excerpt: None,
        },
    ];
    assert_eq!(total_unchecked(&statuses), 5);
}
