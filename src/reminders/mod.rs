use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::frontmatter;

pub const REMINDERS_DIR: &str = "reminders";

/// The context record a reminder's conditions are tested against:
/// hook name, tool name, operating mode and similar keys.
pub type MatchContext = BTreeMap<String, String>;

#[derive(Debug, Default, Deserialize)]
struct ReminderMeta {
    #[serde(default)]
    name: Option<String>,
    /// Context-key → expected value. Empty means unconditional.
    #[serde(default)]
    when: BTreeMap<String, String>,
    #[serde(default)]
    priority: i64,
}

/// A conditionally-injected text snippet.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub name: String,
    pub when: BTreeMap<String, String>,
    pub priority: i64,
    pub content: String,
    pub path: PathBuf,
}

impl Reminder {
    /// A reminder matches iff every declared condition equals the
    /// corresponding context value. An empty `when` matches any context.
    pub fn matches(&self, context: &MatchContext) -> bool {
        self.when
            .iter()
            .all(|(key, expected)| context.get(key) == Some(expected))
    }
}

fn parse_reminder(path: &Path) -> Result<Reminder> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let (meta, content): (ReminderMeta, String) = frontmatter::parse(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    let name = meta.name.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("reminder")
            .to_string()
    });
    Ok(Reminder {
        name,
        when: meta.when,
        priority: meta.priority,
        content,
        path: path.to_path_buf(),
    })
}

/// Load reminders from `<dir>/reminders/`, filter by the context record,
/// and order by descending priority. The sort is stable: ties preserve
/// filename scan order. A missing directory yields no reminders. A document
/// that fails to parse is skipped with a stderr note, not fatal.
pub fn load(dir: &Path, context: &MatchContext) -> Result<Vec<Reminder>> {
    let reminders_dir = dir.join(REMINDERS_DIR);
    let entries = match fs::read_dir(&reminders_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", reminders_dir.display()));
        }
    };

    // read_dir order is platform-dependent; sort filenames so "scan order"
    // is deterministic.
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut reminders = Vec::new();
    for path in &paths {
        match parse_reminder(path) {
            Ok(reminder) => {
                if reminder.matches(context) {
                    reminders.push(reminder);
                }
            }
            Err(e) => eprintln!("ketchup: skipping reminder {}: {e:#}", path.display()),
        }
    }

    reminders.sort_by_key(|r| std::cmp::Reverse(r.priority));
    Ok(reminders)
}

/// Concatenate matched reminder bodies with a blank-line separator,
/// ready for prompt injection. `None` when nothing matched.
pub fn render(reminders: &[Reminder]) -> Option<String> {
    if reminders.is_empty() {
        return None;
    }
    Some(
        reminders
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// Build a match context from key/value pairs, dropping empty values.
pub fn context(pairs: &[(&str, &str)]) -> MatchContext {
    pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
