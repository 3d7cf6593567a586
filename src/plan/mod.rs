use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::transcript::PLAN_FILENAME;

/// Upward directory walk from a working directory is bounded to this depth.
const MAX_WALK_LEVELS: usize = 5;
/// The TODO excerpt included in decision prompts is capped at this length.
const EXCERPT_MAX: usize = 500;

/// Unchecked checklist item: `- [ ] ...` or `* [ ] ...`.
static UNCHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[ \]").expect("unchecked pattern must compile"));

/// A heading whose text mentions TODO, any level.
static TODO_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#+\s.*\btodo\b").expect("todo pattern must compile"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s").expect("heading pattern must compile"));

/// The incomplete-work status of one plan file.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStatus {
    pub path: PathBuf,
    /// Number of unchecked checklist items.
    pub unchecked: usize,
    /// The first TODO-headed section, capped at 500 chars.
    pub todo_excerpt: Option<String>,
}

/// Count unchecked items and pull the first TODO section from plan text.
fn analyze(contents: &str) -> (usize, Option<String>) {
    let unchecked = contents
        .lines()
        .filter(|l| UNCHECKED_RE.is_match(l))
        .count();

    let mut excerpt: Option<String> = None;
    let mut in_todo = false;
    let mut section = String::new();
    for line in contents.lines() {
        if in_todo {
            if HEADING_RE.is_match(line) && !TODO_HEADING_RE.is_match(line) {
                break;
            }
            section.push_str(line);
            section.push('\n');
            if section.len() >= EXCERPT_MAX {
                break;
            }
        } else if TODO_HEADING_RE.is_match(line) {
            in_todo = true;
            section.push_str(line);
            section.push('\n');
        }
    }
    if in_todo {
        let mut text = section.trim_end().to_string();
        if text.len() > EXCERPT_MAX {
            let mut end = EXCERPT_MAX;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        excerpt = Some(text);
    }

    (unchecked, excerpt)
}

/// Inspect one plan file. Returns `None` when the file is absent,
/// unreadable, or has no unchecked items: a finished plan is not
/// reported as incomplete.
pub fn inspect(path: &Path) -> Option<PlanStatus> {
    let contents = fs::read_to_string(path).ok()?;
    let (unchecked, todo_excerpt) = analyze(&contents);
    if unchecked == 0 {
        return None;
    }
    Some(PlanStatus {
        path: path.to_path_buf(),
        unchecked,
        todo_excerpt,
    })
}

/// Walk upward from `dir` (at most `MAX_WALK_LEVELS` levels) looking for the
/// conventional plan file; the first one found wins for this directory.
fn find_plan_upward(dir: &Path) -> Option<PathBuf> {
    let mut current = Some(dir);
    for _ in 0..MAX_WALK_LEVELS {
        let dir = current?;
        let candidate = dir.join(PLAN_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

/// Discover and inspect incomplete plan files: explicit paths recovered from
/// the transcript first, then one upward search per working directory.
/// Duplicates are inspected once.
pub fn discover(plan_paths: &[PathBuf], working_dirs: &[PathBuf]) -> Vec<PlanStatus> {
    let mut seen: Vec<PathBuf> = Vec::new();
    let mut statuses = Vec::new();

    let mut consider = |path: PathBuf, statuses: &mut Vec<PlanStatus>| {
        if seen.contains(&path) {
            return;
        }
        seen.push(path.clone());
        if let Some(status) = inspect(&path) {
            statuses.push(status);
        }
    };

    for path in plan_paths {
        consider(path.clone(), &mut statuses);
    }
    for dir in working_dirs {
        if let Some(found) = find_plan_upward(dir) {
            consider(found, &mut statuses);
        }
    }

    statuses
}

/// Total unchecked items across all discovered plans.
pub fn total_unchecked(statuses: &[PlanStatus]) -> usize {
    statuses.iter().map(|s| s.unchecked).sum()
}

#[cfg(test)]
mod tests;
