use minijinja::{Environment, context};

use crate::judge::DecisionBackend;
use crate::plan::{self, PlanStatus};
use crate::state::{AutoContinueMode, HookState};
use crate::transcript::{ClueKind, CollectedClues};

// ===================================================================
// Inputs
// ===================================================================

/// Transcript-derived signals, gathered lazily: non-stop mode and the
/// early allow paths never pay for a transcript scan.
pub struct Signals {
    pub clues: CollectedClues,
    pub plans: Vec<PlanStatus>,
}

impl Signals {
    /// No clues and no unchecked plan items means there is nothing left
    /// to argue about: the assistant may stop without consulting a judge.
    pub fn quiet(&self) -> bool {
        self.clues.clues.is_empty() && plan::total_unchecked(&self.plans) == 0
    }
}

// ===================================================================
// Output
// ===================================================================

/// Persisted-state side effect the caller must apply after deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEffect {
    None,
    Increment,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopVerdict {
    /// Let the assistant stop.
    Allow { reason: String },
    /// Keep the assistant running, with a reason it will see.
    Block { reason: String },
}

#[derive(Debug)]
pub struct StopDecision {
    pub verdict: StopVerdict,
    pub effect: IterationEffect,
}

impl StopDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            verdict: StopVerdict::Allow {
                reason: reason.into(),
            },
            effect: IterationEffect::None,
        }
    }
}

// ===================================================================
// Decision prompt
// ===================================================================

const DECISION_PROMPT: &str = r#"You are judging whether a coding assistant that wants to stop has actually finished its work.

## Transcript signals

{% for clue in clues %}- [{{ clue.timestamp }}] {{ clue.source }}/{{ clue.kind }}{% if clue.matched_pattern %} ({{ clue.matched_pattern }}){% endif %}: {{ clue.text }}
{% endfor %}
## Recent exchanges

{% for chat in chats %}[{{ chat.timestamp }}]
user: {{ chat.user }}
assistant: {{ chat.assistant }}

{% endfor %}## Plan status

{% if plans %}{% for p in plans %}- {{ p.path }}: {{ p.unchecked }} unchecked items
{% if p.todo_excerpt %}{{ p.todo_excerpt }}
{% endif %}{% endfor %}{% else %}No incomplete plan files found.
{% endif %}
If meaningful work clearly remains, respond with a single JSON object
{"decision": "CONTINUE", "reason": "<what remains>"}. If the session looks
complete, respond {"decision": "STOP", "reason": "<why>"}.
"#;

fn render_decision_prompt(signals: &Signals) -> Result<String, minijinja::Error> {
    #[derive(serde::Serialize)]
    struct ClueRow<'a> {
        timestamp: &'a str,
        source: &'a str,
        kind: &'a str,
        matched_pattern: Option<&'a str>,
        text: &'a str,
    }
    #[derive(serde::Serialize)]
    struct ChatRow<'a> {
        timestamp: &'a str,
        user: &'a str,
        assistant: &'a str,
    }
    #[derive(serde::Serialize)]
    struct PlanRow<'a> {
        path: String,
        unchecked: usize,
        todo_excerpt: Option<&'a str>,
    }

    let clues: Vec<ClueRow> = signals
        .clues
        .clues
        .iter()
        .map(|c| ClueRow {
            timestamp: &c.timestamp,
            source: c.source.as_str(),
            kind: match c.kind {
                ClueKind::Pattern => "pattern",
                ClueKind::Ketchup => "ketchup",
                ClueKind::Plan => "plan",
            },
            matched_pattern: c.matched_pattern.as_deref(),
            text: &c.text,
        })
        .collect();
    let chats: Vec<ChatRow> = signals
        .clues
        .last_chats
        .iter()
        .map(|c| ChatRow {
            timestamp: &c.timestamp,
            user: &c.user,
            assistant: &c.assistant,
        })
        .collect();
    let plans: Vec<PlanRow> = signals
        .plans
        .iter()
        .map(|p| PlanRow {
            path: p.path.display().to_string(),
            unchecked: p.unchecked,
            todo_excerpt: p.todo_excerpt.as_deref(),
        })
        .collect();

    let env = Environment::new();
    let tmpl = env.template_from_str(DECISION_PROMPT)?;
    tmpl.render(context! { clues, chats, plans })
}

// ===================================================================
// Engine
// ===================================================================

/// Decide whether the assistant may stop.
///
/// Transitions are checked strictly in order, first match wins. The smart
/// path consults the external judge only when signals exist, and any judge
/// failure degrades to allow: tooling errors must never trap the host in a
/// non-terminating loop.
pub fn decide_stop(
    state: &HookState,
    stop_hook_active: bool,
    permission_mode: Option<&str>,
    signals: impl FnOnce() -> Option<Signals>,
    backend: &dyn DecisionBackend,
) -> StopDecision {
    let auto = &state.auto_continue;

    // 1. Feature disabled.
    if auto.mode == AutoContinueMode::Off {
        return StopDecision::allow("auto-continue disabled");
    }

    // 2. Re-entrancy guard: a stop hook firing from a continuation we
    // ourselves forced must not force another one.
    if stop_hook_active {
        return StopDecision::allow("stop hook already active");
    }

    // 3. Configured skip modes (planning sessions by default).
    if let Some(mode) = permission_mode {
        if auto.skip_modes.iter().any(|m| m == mode) {
            return StopDecision::allow(format!("skipping mode: {mode}"));
        }
    }

    // 4. Non-stop mode: bypass all signal collection.
    if auto.mode == AutoContinueMode::NonStop {
        if auto.max_iterations > 0 && auto.iteration >= auto.max_iterations {
            return StopDecision {
                verdict: StopVerdict::Allow {
                    reason: "iteration limit reached".into(),
                },
                effect: IterationEffect::Reset,
            };
        }
        let next = auto.iteration + 1;
        let limit = if auto.max_iterations > 0 {
            auto.max_iterations.to_string()
        } else {
            "unlimited".to_string()
        };
        return StopDecision {
            verdict: StopVerdict::Block {
                reason: format!("non-stop mode - iteration {next}/{limit}"),
            },
            effect: IterationEffect::Increment,
        };
    }

    // 5. Smart mode: weigh transcript signals, deferring to the judge.
    let Some(signals) = signals() else {
        return StopDecision::allow("no transcript available");
    };

    if signals.quiet() {
        return StopDecision::allow("no work remaining");
    }

    let prompt = match render_decision_prompt(&signals) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ketchup: decision prompt failed: {e}");
            return StopDecision::allow(format!("decision prompt failed: {e}"));
        }
    };

    match backend.invoke(&prompt) {
        Ok(verdict) => match verdict.decision.to_uppercase().as_str() {
            "CONTINUE" => StopDecision {
                verdict: StopVerdict::Block {
                    reason: verdict
                        .reason
                        .unwrap_or_else(|| "work remains in this session".into()),
                },
                effect: IterationEffect::None,
            },
            "STOP" => StopDecision::allow(
                verdict
                    .reason
                    .unwrap_or_else(|| "external judge approved stop".into()),
            ),
            other => StopDecision::allow(format!("unrecognized judge decision '{other}'")),
        },
        Err(e) => StopDecision::allow(format!("external judge unavailable: {e}")),
    }
}
