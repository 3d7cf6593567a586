use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::denylist;
use crate::judge::{ClaudeCli, DecisionBackend};
use crate::plan;
use crate::reminders;
use crate::state::{StateStore, ValidateMode};
use crate::stop::{self, IterationEffect, Signals, StopVerdict};
use crate::subagent;
use crate::transcript;
use crate::types::{
    HookOutput, HookSpecificOutput, PreToolUseInput, PreToolUseOutput,
    PreToolUsePermissionDecision, SessionEndInput, SessionStartInput, SessionStartOutput,
    StopInput, SubagentStopInput, ToolCall, UserPromptSubmitInput, UserPromptSubmitOutput,
};
use crate::validate::{self, CommitContext};

/// Project data directory, created at the repository root.
pub const DATA_DIR: &str = ".ketchup";

/// Standing reminder injected on prompt submission when no custom one is set.
const DEFAULT_PROMPT_REMINDER: &str = "Keep the ketchup plan current: check off \
finished bursts and record newly discovered work before moving on.";

fn hint(message: String) -> Option<HookOutput> {
    Some(HookOutput {
        system_message: Some(message),
        ..Default::default()
    })
}

pub struct Session {
    repo: git2::Repository,
    dir: PathBuf,
    session_id: String,
    pub store: StateStore,
    backend: Box<dyn DecisionBackend>,
}

impl Session {
    /// Open the git repo from `cwd`, ensure `.ketchup/` exists, and return a
    /// `Session` backed by the Claude CLI judge.
    pub fn open(cwd: &str, session_id: &str) -> Result<Self> {
        Self::open_with_backend(cwd, session_id, Box::new(ClaudeCli::new()))
    }

    /// Like `open`, with an injected decision backend.
    pub fn open_with_backend(
        cwd: &str,
        session_id: &str,
        backend: Box<dyn DecisionBackend>,
    ) -> Result<Self> {
        let repo = git2::Repository::discover(cwd)
            .with_context(|| format!("finding git repo from {cwd}"))?;
        let workdir = repo
            .workdir()
            .context("git repo is bare, no working directory")?;
        let dir = workdir.join(DATA_DIR);
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let store = StateStore::new(&dir);
        Ok(Self {
            repo,
            dir,
            session_id: session_id.to_string(),
            store,
            backend,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ---------------------------------------------------------------
    // Git helpers
    // ---------------------------------------------------------------

    /// Check whether the repo has any uncommitted or untracked changes,
    /// excluding `.ketchup/`.
    fn has_uncommitted_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .context("checking git status")?;
        let all_in_metadata = statuses.iter().all(|s| {
            s.path()
                .is_some_and(|p| Path::new(p).starts_with(DATA_DIR))
        });
        Ok(!statuses.is_empty() && !all_in_metadata)
    }

    /// Check whether `.ketchup` is covered by the repo's ignore rules.
    fn is_data_dir_ignored(&self) -> bool {
        self.repo
            .is_path_ignored(Path::new(DATA_DIR))
            .unwrap_or(false)
    }

    fn diff_to_string(diff: &git2::Diff) -> Result<String> {
        let mut text = String::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => text.push(line.origin()),
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .context("printing diff")?;
        Ok(text)
    }

    fn diff_files(diff: &git2::Diff) -> Vec<String> {
        diff.deltas()
            .filter_map(|d| {
                d.new_file()
                    .path()
                    .or_else(|| d.old_file().path())
                    .map(|p| p.display().to_string())
            })
            .collect()
    }

    /// Build the commit context the validation gate judges: the staged diff
    /// against HEAD, falling back to working-tree changes when the index is
    /// clean (covers `git commit -a`).
    fn commit_context(&self, message: String) -> Result<CommitContext> {
        let head_tree = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_tree().ok());
        let index = self.repo.index().context("opening index")?;
        let staged = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)
            .context("diffing index")?;

        let diff = if staged.deltas().len() > 0 {
            staged
        } else {
            let mut opts = git2::DiffOptions::new();
            opts.include_untracked(true);
            self.repo
                .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
                .context("diffing working tree")?
        };

        Ok(CommitContext {
            files: Self::diff_files(&diff),
            diff: Self::diff_to_string(&diff)?,
            message,
        })
    }

    // ---------------------------------------------------------------
    // Hook handlers
    // ---------------------------------------------------------------

    pub fn handle_session_start(&self, input: &SessionStartInput) -> Result<Option<HookOutput>> {
        let mode = input
            .common
            .permission_mode
            .as_ref()
            .map(|m| m.as_str())
            .unwrap_or("");
        let context = reminders::context(&[
            ("hook", "SessionStart"),
            ("source", input.source.as_str()),
            ("mode", mode),
        ]);
        let matched = reminders::load(&self.dir, &context)?;
        let additional_context = reminders::render(&matched);

        let mut warnings: Vec<String> = Vec::new();
        if !self.is_data_dir_ignored() {
            warnings.push(
                ".ketchup is not in .gitignore — add it to avoid committing hook state".into(),
            );
        }

        if additional_context.is_none() && warnings.is_empty() {
            return Ok(None);
        }
        Ok(Some(HookOutput {
            system_message: if warnings.is_empty() {
                None
            } else {
                Some(format!("[ketchup] warning: {}", warnings.join("; ")))
            },
            hook_specific_output: additional_context.map(|ctx| {
                HookSpecificOutput::SessionStart(SessionStartOutput {
                    additional_context: Some(ctx),
                })
            }),
            ..Default::default()
        }))
    }

    pub fn handle_user_prompt_submit(
        &self,
        input: &UserPromptSubmitInput,
    ) -> Result<Option<HookOutput>> {
        let state = self.store.read()?;
        let mode = input
            .common
            .permission_mode
            .as_ref()
            .map(|m| m.as_str())
            .unwrap_or("");
        let context =
            reminders::context(&[("hook", "UserPromptSubmit"), ("mode", mode)]);
        let matched = reminders::load(&self.dir, &context)?;

        let mut sections: Vec<String> = Vec::new();
        if state.prompt_reminder.enabled {
            sections.push(
                state
                    .prompt_reminder
                    .custom_reminder
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROMPT_REMINDER.to_string()),
            );
        }
        if let Some(rendered) = reminders::render(&matched) {
            sections.push(rendered);
        }

        if sections.is_empty() {
            return Ok(None);
        }
        Ok(Some(HookOutput {
            hook_specific_output: Some(HookSpecificOutput::UserPromptSubmit(
                UserPromptSubmitOutput {
                    additional_context: Some(sections.join("\n\n")),
                },
            )),
            ..Default::default()
        }))
    }

    pub fn handle_pre_tool_use(&self, input: &PreToolUseInput) -> Result<Option<HookOutput>> {
        let state = self.store.read()?;
        let call = match input.tool_call() {
            Ok(call) => call,
            Err(e) => {
                // Malformed tool input degrades to no opinion, never a crash.
                eprintln!("ketchup: unparsable {} input: {e}", input.tool_name);
                return Ok(None);
            }
        };

        // --- Deny-list enforcement on file-writing tools ---
        if state.deny_list.enabled {
            if let Some(path) = call.written_path() {
                let mut patterns = denylist::load_patterns(&self.dir)?;
                patterns.extend(state.deny_list.extra_patterns.iter().cloned());
                if let Some(pattern) = denylist::match_denied(path, &patterns) {
                    return Ok(Some(HookOutput {
                        hook_specific_output: Some(HookSpecificOutput::PreToolUse(
                            PreToolUseOutput {
                                permission_decision: Some(PreToolUsePermissionDecision::Deny),
                                permission_decision_reason: Some(format!(
                                    "{path} is protected by deny pattern '{pattern}'"
                                )),
                                additional_context: None,
                            },
                        )),
                        ..Default::default()
                    }));
                }
            }
        }

        // --- Commit validation gate on `git commit` commands ---
        let mut warn_message: Option<String> = None;
        if let ToolCall::Bash(bash) = &call {
            if state.validate_commit.mode != ValidateMode::Off
                && validate::is_git_commit(&bash.command)
            {
                let message =
                    validate::extract_commit_message(&bash.command).unwrap_or_default();
                let ctx = self.commit_context(message)?;
                let set = validate::load(&self.dir)?;
                if !set.validators.is_empty() {
                    let outcome = validate::run_gate(
                        &set.validators,
                        &ctx,
                        set.appeal.as_ref(),
                        self.backend.as_ref(),
                        state.validate_commit.batch_count,
                    );
                    if !outcome.allowed {
                        let block = validate::format_block_message(&outcome.results);
                        match state.validate_commit.mode {
                            ValidateMode::Strict => {
                                return Ok(Some(HookOutput {
                                    hook_specific_output: Some(
                                        HookSpecificOutput::PreToolUse(PreToolUseOutput {
                                            permission_decision: Some(
                                                PreToolUsePermissionDecision::Deny,
                                            ),
                                            permission_decision_reason: Some(block),
                                            additional_context: None,
                                        }),
                                    ),
                                    ..Default::default()
                                }));
                            }
                            ValidateMode::Warn => {
                                warn_message = Some(format!("[ketchup] warning:\n{block}"));
                            }
                            ValidateMode::Off => {}
                        }
                    } else if let Some(appeal) = &outcome.appeal {
                        warn_message =
                            Some(format!("[ketchup] commit allowed on appeal: {appeal}"));
                    }
                }
            }
        }

        // --- Matched reminders become additional context ---
        let mode = input
            .common
            .permission_mode
            .as_ref()
            .map(|m| m.as_str())
            .unwrap_or("");
        let context = reminders::context(&[
            ("hook", "PreToolUse"),
            ("toolName", &input.tool_name),
            ("mode", mode),
        ]);
        let matched = reminders::load(&self.dir, &context)?;
        let additional_context = reminders::render(&matched);

        if warn_message.is_none() && additional_context.is_none() {
            return Ok(None);
        }
        Ok(Some(HookOutput {
            system_message: warn_message,
            hook_specific_output: additional_context.map(|ctx| {
                HookSpecificOutput::PreToolUse(PreToolUseOutput {
                    additional_context: Some(ctx),
                    ..Default::default()
                })
            }),
            ..Default::default()
        }))
    }

    pub fn handle_stop(&self, input: &StopInput) -> Result<Option<HookOutput>> {
        let state = self.store.read()?;
        let mode = input.common.permission_mode.as_ref().map(|m| m.as_str());
        let transcript_path = input.common.transcript_path.clone();

        let signals = || -> Option<Signals> {
            if transcript_path.is_empty() {
                return None;
            }
            let clues = transcript::collect_clues(Path::new(&transcript_path));
            eprintln!("ketchup: {}", clues.summary);

            // Plan discovery starts from explicit references, then walks up
            // from every directory the session touched.
            let mut dirs = clues.working_dirs.clone();
            if let Some(cwd) = &clues.session_cwd {
                if !dirs.contains(cwd) {
                    dirs.push(cwd.clone());
                }
            }
            let plans = plan::discover(&clues.ketchup_plan_paths, &dirs);
            Some(Signals { clues, plans })
        };

        let decision = stop::decide_stop(
            &state,
            input.stop_hook_active,
            mode,
            signals,
            self.backend.as_ref(),
        );

        match decision.effect {
            IterationEffect::Increment => {
                self.store.increment_iteration()?;
            }
            IterationEffect::Reset => {
                self.store.reset_iteration()?;
            }
            IterationEffect::None => {}
        }

        match decision.verdict {
            StopVerdict::Allow { reason } => Ok(hint(format!("[ketchup] allowing stop: {reason}"))),
            StopVerdict::Block { reason } => Ok(Some(HookOutput::block(reason))),
        }
    }

    pub fn handle_subagent_stop(&self, input: &SubagentStopInput) -> Result<Option<HookOutput>> {
        if input.stop_hook_active {
            return Ok(None);
        }
        let state = self.store.read()?;
        if state.validate_commit.mode == ValidateMode::Off {
            return Ok(None);
        }

        let class = subagent::classify(&input.agent_type);
        let hooks = &state.subagent_hooks;
        let enabled = match class {
            subagent::TaskClass::Explore => hooks.validate_commit_on_explore,
            subagent::TaskClass::Work => hooks.validate_commit_on_work,
            subagent::TaskClass::Unknown => hooks.validate_commit_on_unknown,
        };
        if !enabled || !self.has_uncommitted_changes()? {
            return Ok(None);
        }

        let set = validate::load(&self.dir)?;
        if set.validators.is_empty() {
            return Ok(None);
        }

        // No commit message exists yet on this path, so appeals never apply.
        let ctx = self.commit_context(format!("(uncommitted {} subagent changes)", class.as_str()))?;
        let outcome = validate::run_gate(
            &set.validators,
            &ctx,
            None,
            self.backend.as_ref(),
            state.validate_commit.batch_count,
        );
        if outcome.allowed {
            return Ok(None);
        }

        let block = validate::format_block_message(&outcome.results);
        match state.validate_commit.mode {
            ValidateMode::Strict => Ok(Some(HookOutput::block(format!(
                "subagent ({}) left changes that fail validation\n{block}",
                class.as_str()
            )))),
            ValidateMode::Warn => Ok(hint(format!("[ketchup] warning:\n{block}"))),
            ValidateMode::Off => Ok(None),
        }
    }

    pub fn handle_session_end(&self, _input: &SessionEndInput) -> Result<Option<HookOutput>> {
        // A fresh session starts its auto-continue count from zero.
        self.store.reset_iteration()?;
        Ok(None)
    }
}
