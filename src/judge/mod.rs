use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};

/// Environment variable overriding the judge binary (used by tests to
/// substitute a stub executable).
pub const JUDGE_BIN_ENV: &str = "KETCHUP_CLAUDE_BIN";
const DEFAULT_JUDGE_BIN: &str = "claude";

/// The structured response every external decision returns.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Verdict {
    pub decision: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug)]
pub enum InvokeError {
    /// The judge process could not be spawned or exited non-zero.
    Invocation(String),
    /// The output contained no parseable `{decision, ...}` object.
    NoDecision(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Invocation(msg) => write!(f, "judge invocation failed: {msg}"),
            InvokeError::NoDecision(out) => {
                write!(f, "no decision object in judge output: {out}")
            }
        }
    }
}

impl std::error::Error for InvokeError {}

/// The external natural-language judge, modelled as an injected collaborator.
/// All decision components depend only on this contract, never on how the
/// call is transported.
pub trait DecisionBackend {
    fn invoke(&self, prompt: &str) -> Result<Verdict, InvokeError>;
}

// ===================================================================
// Response extraction
// ===================================================================

/// Byte length of the balanced JSON object starting at `s[0] == '{'`,
/// accounting for strings and escapes. `None` if never closed.
fn balanced_object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in s.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first JSON object carrying a `decision` field from output
/// that may embed it in surrounding prose. Every balanced-brace candidate
/// is tried in turn, so a decision object nested inside a larger
/// non-matching object is still found.
pub fn extract_verdict(output: &str) -> Result<Verdict, InvokeError> {
    for (start, _) in output.match_indices('{') {
        if let Some(len) = balanced_object_len(&output[start..]) {
            if let Ok(verdict) = serde_json::from_str::<Verdict>(&output[start..start + len]) {
                return Ok(verdict);
            }
        }
    }
    Err(InvokeError::NoDecision(
        output.chars().take(200).collect::<String>(),
    ))
}

// ===================================================================
// Claude CLI backend
// ===================================================================

/// Production backend: spawns the Claude CLI in print mode with the prompt
/// on stdin and parses the decision object out of its text output.
pub struct ClaudeCli {
    binary: String,
}

impl ClaudeCli {
    pub fn new() -> Self {
        let binary = std::env::var(JUDGE_BIN_ENV)
            .unwrap_or_else(|_| DEFAULT_JUDGE_BIN.to_string());
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionBackend for ClaudeCli {
    fn invoke(&self, prompt: &str) -> Result<Verdict, InvokeError> {
        let mut child = Command::new(&self.binary)
            .args(["-p", "--output-format", "text"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InvokeError::Invocation(format!("spawning {}: {e}", self.binary)))?;

        child
            .stdin
            .as_mut()
            .ok_or_else(|| InvokeError::Invocation("no stdin handle".into()))?
            .write_all(prompt.as_bytes())
            .map_err(|e| InvokeError::Invocation(format!("writing prompt: {e}")))?;

        let output = child
            .wait_with_output()
            .map_err(|e| InvokeError::Invocation(format!("waiting for {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InvokeError::Invocation(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        extract_verdict(&String::from_utf8_lossy(&output.stdout))
    }
}
