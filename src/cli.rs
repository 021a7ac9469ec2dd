//! CLI struct definitions for the ntm-orch command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[clap(
    name = "ntm-orch",
    version = env!("CARGO_PKG_VERSION"),
    about = "ntm-orch is the daemonless command gate that agent hooks call on demand to keep one long-running ntm session honest.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run a lifecycle intercept. Reads one JSON request on stdin; exit 2 blocks.
    Hook {
        #[clap(subcommand)]
        event: HookEvent,
    },
    /// Show the active session and its recorded state.
    Status(StatusCli),
    /// Remove the active-session index so a stop is no longer blocked.
    Clear(ClearCli),
    /// Print the version.
    Version,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub(crate) enum HookEvent {
    /// Gate a shell command before it runs.
    PreToolUse,
    /// Gate the orchestrator's attempt to end its turn.
    Stop,
}

impl HookEvent {
    /// Event name as it appears in the request's `hook_event_name`.
    pub(crate) fn wire_name(self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::Stop => "Stop",
        }
    }
}

#[derive(clap::Args, Debug)]
pub(crate) struct StatusCli {
    /// Output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ClearCli {
    /// Only clear when the index names this session.
    #[clap(long)]
    pub session: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}
