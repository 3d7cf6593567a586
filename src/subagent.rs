use std::sync::LazyLock;

use crate::rules::{Rule, first_match};

/// What kind of work a subagent was doing, inferred from its task text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Explore,
    Work,
    Unknown,
}

impl TaskClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Work => "work",
            Self::Unknown => "unknown",
        }
    }
}

/// Ordered classification rules: read-only investigation first, then
/// mutating work. First match wins; no match is Unknown.
static CLASS_RULES: LazyLock<Vec<Rule<TaskClass>>> = LazyLock::new(|| {
    vec![
        Rule::new(
            TaskClass::Explore,
            r"(?i)\b(?:explore|search|find|locate|investigate|research|review|read|inspect|audit|understand)\b",
        ),
        Rule::new(
            TaskClass::Work,
            r"(?i)\b(?:implement|fix|build|write|create|add|refactor|update|migrate|delete|remove|work)\b",
        ),
    ]
});

/// Classify a subagent's task description.
pub fn classify(task: &str) -> TaskClass {
    first_match(&CLASS_RULES, task)
        .map(|rule| rule.label)
        .unwrap_or(TaskClass::Unknown)
}
