use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::rules::{Rule, first_match};

/// At most this many clues of each type are retained (oldest evicted).
pub const CLUE_CAP: usize = 10;
/// At most this many chat exchanges are retained (oldest evicted).
pub const CHAT_CAP: usize = 5;
/// Clue text longer than this is truncated with a `...` marker.
pub const CLUE_TEXT_MAX: usize = 200;
/// Conventional plan file name looked for in transcripts and directories.
pub const PLAN_FILENAME: &str = "ketchup-plan.md";

// ===================================================================
// Transcript entry — one per JSONL line
// ===================================================================

/// A single line in a session `.jsonl` transcript. Every field is optional:
/// entries written by other tool versions must still scan, and a line that
/// fails to parse entirely is skipped, never fatal.
#[derive(Debug, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default, rename = "type")]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// `message.content` is a plain string (user text) or an array of blocks
/// (assistant responses, tool calls).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    /// Thinking, tool_result and any future block types carry no clues.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ToolUseBlock {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
}

// ===================================================================
// Clues
// ===================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClueKind {
    /// A continuation-intent rule matched assistant text.
    Pattern,
    /// The literal token "ketchup" appeared.
    Ketchup,
    /// The word "plan" appeared.
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClueSource {
    User,
    Assistant,
}

impl ClueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single extracted signal suggesting work is ongoing or complete.
/// Constructed during one transcript scan, never persisted.
#[derive(Debug, Clone)]
pub struct Clue {
    pub kind: ClueKind,
    pub timestamp: String,
    pub source: ClueSource,
    pub text: String,
    /// Which continuation rule fired, for pattern clues.
    pub matched_pattern: Option<String>,
}

/// One user message paired with the assistant message that answered it.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub user: String,
    pub assistant: String,
    pub timestamp: String,
}

/// Everything one transcript scan recovers.
#[derive(Debug, Default)]
pub struct CollectedClues {
    /// All clue types merged, ascending by timestamp (lexical ISO-8601).
    pub clues: Vec<Clue>,
    /// The most recent user→assistant exchanges, oldest first.
    pub last_chats: Vec<ChatExchange>,
    /// The most recent `cwd` seen across all entries (last-write-wins).
    pub session_cwd: Option<PathBuf>,
    /// Plan files referenced by tool calls or free text, insertion order.
    pub ketchup_plan_paths: Vec<PathBuf>,
    /// Directories the session touched, insertion order.
    pub working_dirs: Vec<PathBuf>,
    /// Human-readable scan outcome, including read errors.
    pub summary: String,
}

impl CollectedClues {
    /// An all-empty result carrying a read error in its summary.
    /// Signals the failure in-band rather than aborting the invocation.
    pub fn unreadable(path: &Path, err: &std::io::Error) -> Self {
        Self {
            summary: format!("transcript unreadable ({}): {err}", path.display()),
            ..Default::default()
        }
    }
}

// ===================================================================
// Pattern rule sets
// ===================================================================

/// Ordered continuation-intent rules. The first rule matching an assistant
/// message produces exactly one pattern clue; later rules on the same
/// message are ignored.
static CONTINUATION_RULES: LazyLock<Vec<Rule<&'static str>>> = LazyLock::new(|| {
    vec![
        Rule::new(
            "continue-intent",
            r"(?i)\b(?:i'?ll|let me|going to|about to)\s+(?:continue|proceed|keep going|move on)",
        ),
        Rule::new(
            "next-step",
            r"(?i)\bnext(?:,)?\s+(?:i'?ll|let me|step|up)\b",
        ),
        Rule::new(
            "remaining-work",
            r"(?i)\b(?:remaining|still\s+(?:need|have)|left\s+to\s+do|yet\s+to)\b",
        ),
        Rule::new("not-done", r"(?i)\bnot\s+(?:yet\s+)?(?:done|finished|complete)\b"),
        Rule::new(
            "progress-count",
            r"(?i)\b\d+\s*(?:of|/)\s*\d+\b.{0,40}\b(?:complete|done|remaining|tasks?|items?|bursts?)\b",
        ),
    ]
});

static KETCHUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ketchup").expect("ketchup pattern must compile"));

static PLAN_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bplan\b").expect("plan pattern must compile"));

/// Absolute-looking paths ending in the plan file name, found in free text.
static PLAN_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(/[^\s"'`]*ketchup-plan\.md)"#).expect("plan path pattern must compile")
});

/// Leading `cd <dir> &&` in a shell command, quoted or unquoted.
static CD_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*cd\s+(?:"([^"]+)"|'([^']+)'|([^\s&;|]+))\s*&&"#)
        .expect("cd pattern must compile")
});

// ===================================================================
// Collector
// ===================================================================

/// Truncate to `CLUE_TEXT_MAX` chars, appending `...` if truncated.
fn truncate_clue_text(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(CLUE_TEXT_MAX) {
        None => trimmed.to_string(),
        Some((byte_idx, _)) => format!("{}...", &trimmed[..byte_idx]),
    }
}

/// Push keeping at most `cap` entries, evicting the oldest.
fn push_capped<T>(vec: &mut Vec<T>, item: T, cap: usize) {
    if vec.len() == cap {
        vec.remove(0);
    }
    vec.push(item);
}

fn push_unique(vec: &mut Vec<PathBuf>, path: PathBuf) {
    if !vec.contains(&path) {
        vec.push(path);
    }
}

#[derive(Default)]
struct Collector {
    pattern_clues: Vec<Clue>,
    ketchup_clues: Vec<Clue>,
    plan_clues: Vec<Clue>,
    chats: Vec<ChatExchange>,
    /// The one pending user message awaiting an assistant reply.
    pending_user: Option<(String, String)>, // (timestamp, text)
    session_cwd: Option<PathBuf>,
    plan_paths: Vec<PathBuf>,
    working_dirs: Vec<PathBuf>,
    skipped_lines: usize,
}

fn make_clue(
    kind: ClueKind,
    timestamp: &str,
    source: ClueSource,
    text: &str,
    matched_pattern: Option<String>,
) -> Clue {
    Clue {
        kind,
        timestamp: timestamp.to_string(),
        source,
        text: truncate_clue_text(text),
        matched_pattern,
    }
}

impl Collector {
    fn scan_tool_use(&mut self, block: &ToolUseBlock) {
        for field in ["file_path", "notebook_path"] {
            if let Some(path) = block.input.get(field).and_then(|v| v.as_str()) {
                let path = Path::new(path);
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(PLAN_FILENAME))
                {
                    push_unique(&mut self.plan_paths, path.to_path_buf());
                }
                if let Some(parent) = path.parent() {
                    if parent != Path::new("") {
                        push_unique(&mut self.working_dirs, parent.to_path_buf());
                    }
                }
            }
        }
        // Only shell tools carry a command worth mining for `cd` targets.
        let is_shell = block.name.as_deref().is_none_or(|n| n.contains("Bash"));
        if !is_shell {
            return;
        }
        if let Some(command) = block.input.get("command").and_then(|v| v.as_str()) {
            if let Some(caps) = CD_PREFIX_RE.captures(command) {
                let dir = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str());
                if let Some(dir) = dir {
                    if dir.starts_with('/') {
                        push_unique(&mut self.working_dirs, PathBuf::from(dir));
                    }
                }
            }
        }
    }

    fn scan_text(&mut self, text: &str, timestamp: &str, source: ClueSource) {
        // Free-text plan path references count regardless of tool structure.
        for caps in PLAN_PATH_RE.captures_iter(text) {
            push_unique(&mut self.plan_paths, PathBuf::from(&caps[1]));
        }

        // Continuation-intent rules apply to assistant text only; the first
        // matching rule wins for the whole message.
        if source == ClueSource::Assistant {
            if let Some(rule) = first_match(&CONTINUATION_RULES, text) {
                let clue = make_clue(
                    ClueKind::Pattern,
                    timestamp,
                    source,
                    text,
                    Some(rule.label.to_string()),
                );
                push_capped(&mut self.pattern_clues, clue, CLUE_CAP);
            }
        }

        // Ketchup and plan mentions are independent of each other and of the
        // pattern rules: one message can yield up to three clue types.
        if KETCHUP_RE.is_match(text) {
            let clue = make_clue(ClueKind::Ketchup, timestamp, source, text, None);
            push_capped(&mut self.ketchup_clues, clue, CLUE_CAP);
        }
        if PLAN_WORD_RE.is_match(text) {
            let clue = make_clue(ClueKind::Plan, timestamp, source, text, None);
            push_capped(&mut self.plan_clues, clue, CLUE_CAP);
        }
    }

    fn scan_entry(&mut self, entry: &TranscriptEntry) {
        if let Some(cwd) = &entry.cwd {
            self.session_cwd = Some(PathBuf::from(cwd));
        }

        let source = match entry.entry_type.as_deref() {
            Some("user") => Some(ClueSource::User),
            Some("assistant") => Some(ClueSource::Assistant),
            _ => None,
        };
        let timestamp = entry.timestamp.as_deref().unwrap_or("");

        let Some(message) = &entry.message else {
            return;
        };
        let Some(content) = &message.content else {
            return;
        };

        // Flatten the message's text: a plain string, or all text blocks
        // joined so per-message rules see one message.
        let mut text_parts: Vec<&str> = Vec::new();
        match content {
            MessageContent::Text(t) => text_parts.push(t),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text(t) => text_parts.push(&t.text),
                        ContentBlock::ToolUse(tu) => self.scan_tool_use(tu),
                        ContentBlock::Other => {}
                    }
                }
            }
        }

        let Some(source) = source else {
            return;
        };
        if text_parts.is_empty() {
            return;
        }
        let text = text_parts.join("\n");
        if text.trim().is_empty() {
            return;
        }

        self.scan_text(&text, timestamp, source);

        // Chat pairing: an assistant message only closes an exchange when a
        // user message is pending, so consecutive assistant messages never
        // produce spurious pairs.
        match source {
            ClueSource::User => {
                self.pending_user = Some((timestamp.to_string(), truncate_clue_text(&text)));
            }
            ClueSource::Assistant => {
                if let Some((_, user_text)) = self.pending_user.take() {
                    push_capped(
                        &mut self.chats,
                        ChatExchange {
                            user: user_text,
                            assistant: truncate_clue_text(&text),
                            timestamp: timestamp.to_string(),
                        },
                        CHAT_CAP,
                    );
                }
            }
        }
    }

    fn finish(self) -> CollectedClues {
        let pattern_count = self.pattern_clues.len();
        let ketchup_count = self.ketchup_clues.len();
        let plan_count = self.plan_clues.len();

        // Per-type caps were applied during the scan; merge and sort the
        // survivors by timestamp. Lexical comparison of ISO-8601 strings is
        // sufficient and intentional. The sort is stable, so clues sharing a
        // timestamp keep type order.
        let mut clues = self.pattern_clues;
        clues.extend(self.ketchup_clues);
        clues.extend(self.plan_clues);
        clues.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut summary = format!(
            "{} clues ({pattern_count} pattern, {ketchup_count} ketchup, {plan_count} plan), \
             {} exchanges, {} plan files, {} working dirs",
            clues.len(),
            self.chats.len(),
            self.plan_paths.len(),
            self.working_dirs.len(),
        );
        if self.skipped_lines > 0 {
            summary.push_str(&format!(", {} unparsable lines skipped", self.skipped_lines));
        }

        CollectedClues {
            clues,
            last_chats: self.chats,
            session_cwd: self.session_cwd,
            ketchup_plan_paths: self.plan_paths,
            working_dirs: self.working_dirs,
            summary,
        }
    }
}

/// Scan transcript contents (one JSON object per line). Unparsable lines
/// are skipped: a corrupt transcript degrades to partial results.
pub fn scan(contents: &str) -> CollectedClues {
    let mut collector = Collector::default();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(entry) => collector.scan_entry(&entry),
            Err(_) => collector.skipped_lines += 1,
        }
    }
    collector.finish()
}

/// Read and scan a transcript file. A missing or unreadable file yields an
/// all-empty result whose summary states the error.
pub fn collect_clues(path: &Path) -> CollectedClues {
    match fs::read_to_string(path) {
        Ok(contents) => scan(&contents),
        Err(e) => CollectedClues::unreadable(path, &e),
    }
}

#[cfg(test)]
mod tests;
