use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FILENAME: &str = "state.json";

// ===================================================================
// Mode enums
// ===================================================================

/// Auto-continue operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoContinueMode {
    #[serde(rename = "smart")]
    Smart,
    #[serde(rename = "non-stop")]
    NonStop,
    #[serde(rename = "off")]
    Off,
}

/// Commit validation operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateMode {
    Strict,
    Warn,
    Off,
}

// ===================================================================
// State sections
// ===================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoContinue {
    #[serde(default = "default_auto_continue_mode")]
    pub mode: AutoContinueMode,
    /// 0 means unbounded.
    #[serde(default)]
    pub max_iterations: u32,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default = "default_skip_modes")]
    pub skip_modes: Vec<String>,
}

fn default_auto_continue_mode() -> AutoContinueMode {
    AutoContinueMode::Smart
}

fn default_skip_modes() -> Vec<String> {
    vec!["plan".to_string()]
}

impl Default for AutoContinue {
    fn default() -> Self {
        Self {
            mode: default_auto_continue_mode(),
            max_iterations: 0,
            iteration: 0,
            skip_modes: default_skip_modes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCommit {
    #[serde(default = "default_validate_mode")]
    pub mode: ValidateMode,
    /// Validators are invoked in chunks of this size; it never changes
    /// the allow/deny outcome.
    #[serde(default = "default_batch_count")]
    pub batch_count: u32,
}

fn default_validate_mode() -> ValidateMode {
    ValidateMode::Strict
}

fn default_batch_count() -> u32 {
    3
}

impl Default for ValidateCommit {
    fn default() -> Self {
        Self {
            mode: default_validate_mode(),
            batch_count: default_batch_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyList {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DenyList {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReminder {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_reminder: Option<String>,
}

impl Default for PromptReminder {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_reminder: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentHooks {
    #[serde(default)]
    pub validate_commit_on_explore: bool,
    #[serde(default = "default_true")]
    pub validate_commit_on_work: bool,
    #[serde(default)]
    pub validate_commit_on_unknown: bool,
}

impl Default for SubagentHooks {
    fn default() -> Self {
        Self {
            validate_commit_on_explore: false,
            validate_commit_on_work: true,
            validate_commit_on_unknown: false,
        }
    }
}

// ===================================================================
// HookState
// ===================================================================

/// The full per-project hook state, stored as `.ketchup/state.json`.
///
/// Every read returns a fully-populated structure: missing top-level keys
/// fall back to section defaults, and missing fields within a present
/// section fall back to serde-level field defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookState {
    #[serde(default)]
    pub auto_continue: AutoContinue,
    #[serde(default)]
    pub validate_commit: ValidateCommit,
    #[serde(default)]
    pub deny_list: DenyList,
    #[serde(default)]
    pub prompt_reminder: PromptReminder,
    #[serde(default)]
    pub subagent_hooks: SubagentHooks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// A partial state document: any subset of top-level sections.
/// Used by `StateStore::update` for shallow per-section merging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialHookState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_continue: Option<AutoContinue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_commit: Option<ValidateCommit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_list: Option<DenyList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_reminder: Option<PromptReminder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_hooks: Option<SubagentHooks>,
}

impl HookState {
    /// Apply a partial document on top of this state, section by section.
    /// Merging is shallow per top-level key: a present section replaces
    /// the whole section.
    pub fn merge(&mut self, partial: PartialHookState) {
        if let Some(s) = partial.auto_continue {
            self.auto_continue = s;
        }
        if let Some(s) = partial.validate_commit {
            self.validate_commit = s;
        }
        if let Some(s) = partial.deny_list {
            self.deny_list = s;
        }
        if let Some(s) = partial.prompt_reminder {
            self.prompt_reminder = s;
        }
        if let Some(s) = partial.subagent_hooks {
            self.subagent_hooks = s;
        }
    }
}

// ===================================================================
// StateStore
// ===================================================================

/// File-backed store for `HookState`.
///
/// Uses a naive read-modify-write cycle with no locking: concurrent hook
/// invocations against the same project can race and lose updates. The
/// usage model is single-operator, single-session; callers that need
/// stronger guarantees must add file locking or atomic-rename writes
/// around this store.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// A store rooted at the project data directory (`.ketchup/`).
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file, bootstrapping it with defaults if absent.
    ///
    /// A partial document is merged with defaults field-by-field. A file
    /// that exists but is not valid JSON is a fatal parse error for this
    /// invocation; there is no silent-repair path.
    pub fn read(&self) -> Result<HookState> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let state: HookState = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", self.path.display()))?;
                Ok(state)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let state = HookState::default();
                self.persist(&state)?;
                Ok(state)
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    /// Serialize the full state, stamping `updatedAt`/`updatedBy`.
    pub fn write(&self, state: &mut HookState, actor: &str) -> Result<()> {
        state.updated_at = Some(chrono::Utc::now().to_rfc3339());
        state.updated_by = Some(actor.to_string());
        self.persist(state)
    }

    /// Read-merge-write: apply a partial document and return the new state.
    pub fn update(&self, partial: PartialHookState, actor: &str) -> Result<HookState> {
        let mut state = self.read()?;
        state.merge(partial);
        self.write(&mut state, actor)?;
        Ok(state)
    }

    /// Bump `autoContinue.iteration` by 1, persist, return the new value.
    pub fn increment_iteration(&self) -> Result<u32> {
        let mut state = self.read()?;
        state.auto_continue.iteration += 1;
        let n = state.auto_continue.iteration;
        self.write(&mut state, "stop-hook")?;
        Ok(n)
    }

    /// Set `autoContinue.iteration` back to 0 and persist.
    pub fn reset_iteration(&self) -> Result<()> {
        let mut state = self.read()?;
        state.auto_continue.iteration = 0;
        self.write(&mut state, "stop-hook")
    }

    fn persist(&self, state: &HookState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("serializing hook state")?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}
