use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::frontmatter;
use crate::judge::DecisionBackend;

pub const VALIDATORS_DIR: &str = "validators";

/// The document name reserved for the appeal validator.
const APPEAL_VALIDATOR_NAME: &str = "appeal";

/// Validator names whose NACK can never be overridden by an appeal.
/// Fixed and non-configurable: these guard destructive operations.
pub const NON_APPEALABLE: &[&str] = &["dangerous-git-operation", "no-force-push"];

// ===================================================================
// Validators
// ===================================================================

#[derive(Debug, Default, Deserialize)]
struct ValidatorMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// An independent policy check evaluated against a proposed commit.
#[derive(Debug, Clone)]
pub struct Validator {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// The policy prompt body.
    pub content: String,
    /// Origin, for diagnostics.
    pub path: PathBuf,
}

fn parse_validator(path: &Path) -> Result<Validator> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let (meta, content): (ValidatorMeta, String) = frontmatter::parse(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    let name = meta.name.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("validator")
            .to_string()
    });
    Ok(Validator {
        name,
        description: meta.description,
        enabled: meta.enabled,
        content,
        path: path.to_path_buf(),
    })
}

/// The full validator set for one invocation: the enabled policy validators
/// in filename order, plus the appeal validator if one is configured.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
    pub appeal: Option<Validator>,
}

/// Load validators from `<dir>/validators/`. Disabled validators are
/// excluded before execution; the document named `appeal` is split out as
/// the appeal validator. A missing directory yields an empty set and an
/// unparsable document is skipped with a stderr note.
pub fn load(dir: &Path) -> Result<ValidatorSet> {
    let validators_dir = dir.join(VALIDATORS_DIR);
    let entries = match fs::read_dir(&validators_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ValidatorSet::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", validators_dir.display()));
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut set = ValidatorSet::default();
    for path in &paths {
        match parse_validator(path) {
            Ok(validator) => {
                if !validator.enabled {
                    continue;
                }
                if validator.name == APPEAL_VALIDATOR_NAME {
                    set.appeal = Some(validator);
                } else {
                    set.validators.push(validator);
                }
            }
            Err(e) => eprintln!("ketchup: skipping validator {}: {e:#}", path.display()),
        }
    }
    Ok(set)
}

// ===================================================================
// Commit context + results
// ===================================================================

/// What the surrounding version-control state says about the proposed
/// commit. Computing this is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    pub diff: String,
    pub files: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorDecision {
    Ack,
    Nack,
}

/// One validator's verdict on one commit attempt.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub validator: String,
    pub decision: ValidatorDecision,
    pub reason: Option<String>,
    /// Derived from the static non-appealable name set, not from the
    /// validator's own output.
    pub appealable: bool,
}

impl ValidationResult {
    fn is_nack(&self) -> bool {
        self.decision == ValidatorDecision::Nack
    }
}

/// The aggregate allow/deny decision for one commit attempt.
#[derive(Debug)]
pub struct GateOutcome {
    pub allowed: bool,
    pub results: Vec<ValidationResult>,
    /// Names of NACKing validators when blocked; empty when allowed.
    pub blocked_by: Vec<String>,
    /// The appeal text found in the commit message, if any.
    pub appeal: Option<String>,
}

// ===================================================================
// Commit message parsing
// ===================================================================

static GIT_COMMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    // `git`, optionally preceded by a command separator, with any mix of
    // flags (and `-C <path>` pairs) before the `commit` subcommand.
    Regex::new(r"(?:^|&&|;|\|)\s*git\s+(?:-C\s+\S+\s+|-[-\w=./]*\s+)*commit\b")
        .expect("git commit pattern must compile")
});

static MESSAGE_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|\s)(?:-m|--message(?:=|\s+))\s*(?:"((?:[^"\\]|\\.)*)"|'([^']*)'|(\S+))"#,
    )
    .expect("message flag pattern must compile")
});

static APPEAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[appeal:\s*([^\]]+)\]").expect("appeal pattern must compile")
});

/// Whether a shell command runs `git commit` (possibly behind `&&` chains).
pub fn is_git_commit(command: &str) -> bool {
    GIT_COMMIT_RE.is_match(command)
}

/// Extract the commit message from a `git commit` command line, joining
/// multiple `-m` paragraphs the way git does.
pub fn extract_commit_message(command: &str) -> Option<String> {
    let parts: Vec<String> = MESSAGE_FLAG_RE
        .captures_iter(command)
        .filter_map(|caps| {
            caps.get(1)
                .map(|m| m.as_str().replace("\\\"", "\""))
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .or_else(|| caps.get(3).map(|m| m.as_str().to_string()))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Extract the bracketed appeal annotation from a commit message.
pub fn extract_appeal(message: &str) -> Option<String> {
    APPEAL_RE
        .captures(message)
        .map(|caps| caps[1].trim().to_string())
}

// ===================================================================
// Prompt construction
// ===================================================================

const VALIDATOR_PROMPT: &str = r#"You are a commit policy validator named "{{ name }}".

## Policy

{{ policy }}

## Commit message

{{ message }}

## Changed files

{% for file in files %}- {{ file }}
{% endfor %}
## Diff

{{ diff }}

Judge only against the policy above. Respond with a single JSON object:
{"decision": "ACK"} to accept, or {"decision": "NACK", "reason": "<why>"} to reject.
"#;

const APPEAL_PROMPT: &str = r#"You are the appeal validator for a commit that was rejected.

## Appeal policy

{{ policy }}

## Commit message

{{ message }}

## Changed files

{% for file in files %}- {{ file }}
{% endfor %}
## Validator results

{% for r in results %}- {{ r.validator }}: {{ r.decision }}{% if r.reason %} ({{ r.reason }}){% endif %}
{% endfor %}
## Appeal

{{ appeal }}

Decide whether the appeal justifies overriding the rejections. Respond with a
single JSON object: {"decision": "ACK"} to grant or
{"decision": "NACK", "reason": "<why>"} to deny.
"#;

fn render_validator_prompt(validator: &Validator, ctx: &CommitContext) -> Result<String> {
    let env = Environment::new();
    let tmpl = env
        .template_from_str(VALIDATOR_PROMPT)
        .context("parsing validator prompt template")?;
    tmpl.render(context! {
        name => validator.name,
        policy => validator.content,
        message => ctx.message,
        files => ctx.files,
        diff => ctx.diff,
    })
    .context("rendering validator prompt")
}

fn render_appeal_prompt(
    validator: &Validator,
    ctx: &CommitContext,
    results: &[ValidationResult],
    appeal: &str,
) -> Result<String> {
    #[derive(serde::Serialize)]
    struct Row<'a> {
        validator: &'a str,
        decision: &'a str,
        reason: Option<&'a str>,
    }
    let rows: Vec<Row> = results
        .iter()
        .map(|r| Row {
            validator: &r.validator,
            decision: match r.decision {
                ValidatorDecision::Ack => "ACK",
                ValidatorDecision::Nack => "NACK",
            },
            reason: r.reason.as_deref(),
        })
        .collect();

    let env = Environment::new();
    let tmpl = env
        .template_from_str(APPEAL_PROMPT)
        .context("parsing appeal prompt template")?;
    tmpl.render(context! {
        policy => validator.content,
        message => ctx.message,
        files => ctx.files,
        results => rows,
        appeal => appeal,
    })
    .context("rendering appeal prompt")
}

// ===================================================================
// Gate
// ===================================================================

fn run_validator(
    validator: &Validator,
    ctx: &CommitContext,
    backend: &dyn DecisionBackend,
) -> ValidationResult {
    let appealable = !NON_APPEALABLE.contains(&validator.name.as_str());
    let prompt = match render_validator_prompt(validator, ctx) {
        Ok(p) => p,
        Err(e) => {
            // Fail closed: a validator we cannot run cannot confirm the commit.
            return ValidationResult {
                validator: validator.name.clone(),
                decision: ValidatorDecision::Nack,
                reason: Some(format!("could not confirm: {e:#}")),
                appealable,
            };
        }
    };

    match backend.invoke(&prompt) {
        Ok(verdict) => match verdict.decision.to_uppercase().as_str() {
            "ACK" => ValidationResult {
                validator: validator.name.clone(),
                decision: ValidatorDecision::Ack,
                reason: verdict.reason,
                appealable,
            },
            "NACK" => ValidationResult {
                validator: validator.name.clone(),
                decision: ValidatorDecision::Nack,
                reason: verdict.reason,
                appealable,
            },
            other => ValidationResult {
                validator: validator.name.clone(),
                decision: ValidatorDecision::Nack,
                reason: Some(format!("could not confirm: unrecognized decision '{other}'")),
                appealable,
            },
        },
        Err(e) => ValidationResult {
            validator: validator.name.clone(),
            decision: ValidatorDecision::Nack,
            reason: Some(format!("could not confirm: {e}")),
            appealable,
        },
    }
}

fn run_appeal(
    validator: &Validator,
    ctx: &CommitContext,
    results: &[ValidationResult],
    appeal: &str,
    backend: &dyn DecisionBackend,
) -> bool {
    let prompt = match render_appeal_prompt(validator, ctx, results, appeal) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ketchup: appeal prompt failed: {e:#}");
            return false;
        }
    };
    match backend.invoke(&prompt) {
        Ok(verdict) => verdict.decision.eq_ignore_ascii_case("ACK"),
        Err(e) => {
            // Appeal failures never unblock a commit.
            eprintln!("ketchup: appeal validator {} failed: {e}", validator.name);
            false
        }
    }
}

/// Route a proposed commit through every enabled validator, then through the
/// appeal validator when the commit message carries an appeal annotation.
///
/// Validators run independently with no early exit; execution order never
/// changes the allow/deny outcome, only reporting order. A NACK from a
/// non-appealable validator is a hard veto: even a granted appeal leaves the
/// commit blocked.
pub fn run_gate(
    validators: &[Validator],
    ctx: &CommitContext,
    appeal_validator: Option<&Validator>,
    backend: &dyn DecisionBackend,
    batch_count: u32,
) -> GateOutcome {
    let batch = batch_count.max(1) as usize;
    let mut results: Vec<ValidationResult> = Vec::with_capacity(validators.len());
    for chunk in validators.chunks(batch) {
        let names: Vec<&str> = chunk.iter().map(|v| v.name.as_str()).collect();
        eprintln!("ketchup: validating commit ({})", names.join(", "));
        for validator in chunk {
            results.push(run_validator(validator, ctx, backend));
        }
    }

    let blocked_by: Vec<String> = results
        .iter()
        .filter(|r| r.is_nack())
        .map(|r| r.validator.clone())
        .collect();
    if blocked_by.is_empty() {
        return GateOutcome {
            allowed: true,
            results,
            blocked_by,
            appeal: None,
        };
    }

    let appeal_text = extract_appeal(&ctx.message);
    let (Some(appeal), Some(appeal_validator)) = (&appeal_text, appeal_validator) else {
        return GateOutcome {
            allowed: false,
            results,
            blocked_by,
            appeal: appeal_text,
        };
    };

    let granted = run_appeal(appeal_validator, ctx, &results, appeal, backend);
    let vetoed = results.iter().any(|r| r.is_nack() && !r.appealable);
    if granted && !vetoed {
        GateOutcome {
            allowed: true,
            results,
            blocked_by: Vec::new(),
            appeal: appeal_text,
        }
    } else {
        GateOutcome {
            allowed: false,
            results,
            blocked_by,
            appeal: appeal_text,
        }
    }
}

/// Deterministic block message: one line per NACKing validator, a
/// cannot-be-appealed note when any NACK is non-appealable, and an appeal
/// hint when any NACK is appealable.
pub fn format_block_message(results: &[ValidationResult]) -> String {
    let nacks: Vec<&ValidationResult> = results.iter().filter(|r| r.is_nack()).collect();
    let mut lines = vec!["commit blocked by validation:".to_string()];
    for nack in &nacks {
        lines.push(format!(
            "{}: {}",
            nack.validator,
            nack.reason.as_deref().unwrap_or("(no reason given)")
        ));
    }

    let non_appealable: Vec<&str> = nacks
        .iter()
        .filter(|r| !r.appealable)
        .map(|r| r.validator.as_str())
        .collect();
    if !non_appealable.is_empty() {
        lines.push(format!(
            "{} cannot be appealed",
            non_appealable.join(", ")
        ));
    }
    if nacks.iter().any(|r| r.appealable) {
        lines.push(
            "to request an override, add [appeal: <justification>] to the commit message"
                .to_string(),
        );
    }
    lines.join("\n")
}
