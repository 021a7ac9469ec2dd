//! ntm-orch: a command gate for one long-running ntm session
//!
//! **ntm-orch is invoked by an agent runtime's lifecycle hooks, once per event,
//! and answers allow or block.** It keeps no daemon: every invariant is carried
//! by small JSON records in a private per-user runtime directory.
//!
//! # Policies
//!
//! - **Robot mode only**: `ntm` runs in robot mode, info mode, or one of the
//!   allowlisted subcommands; `bv` never launches its TUI
//! - **Single active session**: a second spawn is refused while the first is
//!   confirmed live by tmux
//! - **Payload ceiling**: inline `--msg` payloads are capped; larger ones go
//!   through files
//! - **Poll throttling**: robot polls are spaced per session and poll kind
//! - **Capture before kill**: `ntm kill` needs a fresh `ntm save`
//! - **Stop guard**: the agent cannot end its turn while the session is live
//!
//! # Exit Codes
//!
//! Hook subcommands exit `0` to allow and `2` to block, with
//! `BLOCKED: <message>` on stderr. Other subcommands exit `1` on error.
//!
//! # Examples
//!
//! ```bash
//! # Wire into the agent runtime's hook config
//! ntm-orch hook pre-tool-use < request.json
//! ntm-orch hook stop < request.json
//!
//! # Inspect or reset runtime state
//! ntm-orch status --format json
//! ntm-orch clear --session alpha
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: classification, wire format, sessions, store, configuration
//! - [`plugins`]: registry, throttle, capture guard, liveness oracle, gate

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{ClearCli, Cli, Command, HookEvent, OutputFormat, StatusCli};
use crate::core::config::{GateConfig, LOG_FILTER_ENV};
use crate::core::hook::{self, Decision, EXIT_ALLOW};
use crate::core::session::SessionName;
use crate::core::store::RuntimeStore;
use crate::core::time;
use crate::plugins::capture::{CaptureGuard, CaptureMarker};
use crate::plugins::gate::PolicyGate;
use crate::plugins::oracle::{Liveness, ReconciliationOracle, TmuxMultiplexer};
use crate::plugins::registry::{GlobalIndex, SessionRegistry, SessionState};
use crate::plugins::throttle::{PollLedger, PollScope, PollThrottle};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::io;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Parse the command line, dispatch, and return the process exit code.
pub fn run() -> anyhow::Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return Ok(usage_error(e)),
    };
    init_tracing();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_ALLOW)
        }
        Command::Hook { event } => Ok(run_hook(event, &GateConfig::from_env())),
        Command::Status(args) => {
            run_status(&args, &GateConfig::from_env())?;
            Ok(EXIT_ALLOW)
        }
        Command::Clear(args) => {
            run_clear(&args, &GateConfig::from_env())?;
            Ok(EXIT_ALLOW)
        }
    }
}

/// clap's own exit status for usage errors is 2, which a hook runner reads as
/// a block. A malformed hook invocation allows; anything else exits 1.
fn usage_error(e: clap::Error) -> i32 {
    use clap::error::ErrorKind;

    if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
        e.exit();
    }
    let _ = e.print();
    if std::env::args_os().nth(1).is_some_and(|arg| arg == "hook") {
        EXIT_ALLOW
    } else {
        1
    }
}

/// Logs go to stderr only; stdout stays clean for `status --format json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn run_hook(event: HookEvent, config: &GateConfig) -> i32 {
    let store = RuntimeStore::new(&config.runtime_dir);
    let mux = TmuxMultiplexer::new(&config.tmux_path, config.oracle_timeout);
    let gate = PolicyGate::new(&store, &mux, time::now(), std::process::id());

    let tmux = std::env::var("TMUX").ok();
    let pane = std::env::var("TMUX_PANE").ok();
    let decision = if gate.is_spawned_agent(tmux.as_deref(), pane.as_deref()) {
        Decision::Allow
    } else {
        match hook::read_input(&mut io::stdin().lock()) {
            None => {
                warn!("unreadable hook request; allowing");
                Decision::Allow
            }
            Some(input) if input.is_for_other_event(event.wire_name()) => {
                warn!(
                    expected = event.wire_name(),
                    got = input.hook_event_name.as_deref().unwrap_or(""),
                    "hook request names a different event; allowing"
                );
                Decision::Allow
            }
            Some(input) => match event {
                HookEvent::PreToolUse => gate.pre_tool_use(&input),
                HookEvent::Stop => gate.stop(),
            },
        }
    };

    if let Err(e) = decision.emit(&mut io::stderr()) {
        warn!(error = %e, "failed to write hook diagnostic");
    }
    decision.exit_code()
}

#[derive(Debug, Serialize)]
struct StatusReport {
    runtime_dir: String,
    active_session: Option<String>,
    liveness: Option<&'static str>,
    state: Option<SessionState>,
    capture: Option<CaptureMarker>,
    session_polls: Option<PollLedger>,
    global_polls: Option<PollLedger>,
}

fn collect_status(config: &GateConfig) -> StatusReport {
    let store = RuntimeStore::new(&config.runtime_dir);
    let mux = TmuxMultiplexer::new(&config.tmux_path, config.oracle_timeout);
    let oracle = ReconciliationOracle::new(&mux);
    let registry = SessionRegistry::new(&store, &oracle);
    let throttle = PollThrottle::new(&store);

    let active = store
        .read_record::<GlobalIndex>(&store.global_index_path())
        .ok()
        .flatten()
        .map(|index| index.session)
        .filter(|s| !s.is_empty());
    let session = active
        .as_deref()
        .and_then(|raw| SessionName::parse(raw).ok());

    StatusReport {
        runtime_dir: store.root().display().to_string(),
        liveness: active.as_deref().map(|s| oracle.probe(s).as_str()),
        state: session.as_ref().and_then(|s| registry.state(s)),
        capture: session
            .as_ref()
            .and_then(|s| CaptureGuard::new(&store).marker(s)),
        session_polls: session
            .map(PollScope::Session)
            .and_then(|scope| throttle.ledger(&scope)),
        global_polls: throttle.ledger(&PollScope::Global),
        active_session: active,
    }
}

fn run_status(args: &StatusCli, config: &GateConfig) -> anyhow::Result<()> {
    use colored::Colorize;

    let report = collect_status(config);
    if args.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize status")?
        );
        return Ok(());
    }

    println!("{} {}", "Runtime dir:".bright_white(), report.runtime_dir);
    let Some(session) = &report.active_session else {
        println!("{} none", "Active session:".bright_white());
        return Ok(());
    };
    let liveness = match report.liveness {
        Some(l) if l == Liveness::Live.as_str() => l.bright_green(),
        Some(l) if l == Liveness::NotLive.as_str() => l.bright_red(),
        Some(l) => l.yellow(),
        None => "unknown".yellow(),
    };
    println!(
        "{} {} ({})",
        "Active session:".bright_white(),
        session.bright_cyan(),
        liveness
    );
    match &report.state {
        Some(state) => println!("  spawned_at: {} (pid {})", state.spawned_at, state.pid),
        None => println!("  spawned_at: {}", "missing".dimmed()),
    }
    match &report.capture {
        Some(marker) => println!("  captured:   {}", marker.saved_at),
        None => println!("  captured:   {}", "never".dimmed()),
    }
    let now_ms = time::epoch_ms(time::now());
    for ledger in [&report.session_polls, &report.global_polls]
        .into_iter()
        .flatten()
    {
        for (key, last) in &ledger.last_poll_ms {
            println!(
                "  poll {:<24} {:.1}s ago",
                key,
                (now_ms - last) as f64 / 1000.0
            );
        }
    }
    Ok(())
}

fn run_clear(args: &ClearCli, config: &GateConfig) -> anyhow::Result<()> {
    use colored::Colorize;

    let store = RuntimeStore::new(&config.runtime_dir);
    let mux = TmuxMultiplexer::new(&config.tmux_path, config.oracle_timeout);
    let oracle = ReconciliationOracle::new(&mux);
    let registry = SessionRegistry::new(&store, &oracle);

    let only_if = args
        .session
        .as_deref()
        .map(SessionName::parse)
        .transpose()
        .context("invalid --session")?;
    let cleared = registry
        .clear_index(only_if.as_ref())
        .with_context(|| format!("failed to clear index under {}", store.root().display()))?;

    match cleared {
        Some(session) if session.is_empty() => {
            println!("{} removed unreadable active-session marker", "✓".bright_green());
        }
        Some(session) => println!(
            "{} cleared active-session marker ({})",
            "✓".bright_green(),
            session
        ),
        None => println!("{} no matching active-session marker", "ℹ".bright_blue()),
    }
    Ok(())
}
