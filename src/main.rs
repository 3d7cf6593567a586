mod denylist;
mod frontmatter;
mod judge;
mod plan;
mod reminders;
mod rules;
mod session;
mod state;
mod stop;
mod subagent;
mod transcript;
mod types;
mod validate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use session::Session;
use std::io::Read;
use std::process;
use types::{HookInput, HookOutput};

#[derive(Parser)]
#[command(name = "ketchup", about = "Lifecycle hooks for Claude Code sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one hook event: JSON on stdin, decision JSON on stdout.
    Hook,
    /// Print the current merged hook state for this project.
    Status,
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("reading stdin")?;
    Ok(buffer)
}

fn dispatch(input: &HookInput) -> Result<Option<HookOutput>> {
    let common = input.common();
    let session = Session::open(&common.cwd, &common.session_id)?;
    match input {
        HookInput::SessionStart(e) => session.handle_session_start(e),
        HookInput::UserPromptSubmit(e) => session.handle_user_prompt_submit(e),
        HookInput::PreToolUse(e) => session.handle_pre_tool_use(e),
        HookInput::SubagentStop(e) => session.handle_subagent_stop(e),
        HookInput::Stop(e) => session.handle_stop(e),
        HookInput::SessionEnd(e) => session.handle_session_end(e),
    }
}

fn print_output(output: &HookOutput) {
    println!(
        "{}",
        serde_json::to_string(output).expect("Failed to serialize output")
    );
}

/// Events this binary acts on. Anything else passes through silently so a
/// hooks configuration wired to every event stays harmless.
const HANDLED_EVENTS: &[&str] = &[
    "SessionStart",
    "UserPromptSubmit",
    "PreToolUse",
    "SubagentStop",
    "Stop",
    "SessionEnd",
];

fn parse_hook_input(raw: &str) -> Result<Option<HookInput>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("parsing hook input")?;
    let event = value
        .get("hook_event_name")
        .and_then(|v| v.as_str())
        .context("hook input has no hook_event_name")?
        .to_string();
    if !HANDLED_EVENTS.contains(&event.as_str()) {
        return Ok(None);
    }
    let input: HookInput =
        serde_json::from_value(value).with_context(|| format!("parsing {event} input"))?;
    Ok(Some(input))
}

fn run_hook() -> i32 {
    let result = read_stdin()
        .and_then(|raw| parse_hook_input(&raw))
        .and_then(|input| match input {
            Some(input) => dispatch(&input),
            None => Ok(None),
        });

    // The host treats absence of a well-formed response as undefined
    // behavior, so every path emits structured output.
    match result {
        Ok(Some(output)) => {
            print_output(&output);
            0
        }
        Ok(None) => 0,
        Err(err) => {
            eprintln!("ketchup: {err:#}");
            print_output(&HookOutput {
                system_message: Some(format!("[ketchup] error: {err:#}")),
                ..Default::default()
            });
            2
        }
    }
}

fn run_status() -> i32 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("ketchup: reading current dir: {e}");
            return 1;
        }
    };
    let result = Session::open(&cwd.to_string_lossy(), "status")
        .and_then(|session| session.store.read());
    match result {
        Ok(state) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&state).expect("Failed to serialize state")
            );
            0
        }
        Err(err) => {
            eprintln!("ketchup: {err:#}");
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Hook => run_hook(),
        Command::Status => run_status(),
    };
    process::exit(code);
}
