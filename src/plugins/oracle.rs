//! Reconciliation against the process multiplexer.
//!
//! tmux is the ground truth for whether a session is alive. Local markers
//! only ever record belief; when the multiplexer cannot answer, the belief is
//! treated as stale so that no intercept can deadlock on it.

use regex::Regex;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pane titles and has-session output are tiny; anything larger is cut.
const MAX_STDOUT_BYTES: u64 = 64 * 1024;

/// ntm names agent panes `<session>__<agent>_<n>`.
static SPAWNED_AGENT_PANE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__(?:cc|cod|gem|gmi|oll)_\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    NotLive,
    /// The multiplexer is missing, failed, or timed out.
    Unknown,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Liveness::Live => "live",
            Liveness::NotLive => "not-live",
            Liveness::Unknown => "unknown",
        }
    }
}

/// The multiplexer boundary. Implemented by [`TmuxMultiplexer`] in
/// production and by fixed-answer doubles in tests.
pub trait Multiplexer {
    fn has_session(&self, session: &str) -> Liveness;

    fn pane_title(&self, _pane: &str) -> Option<String> {
        None
    }
}

pub struct TmuxMultiplexer {
    binary: PathBuf,
    timeout: Duration,
}

impl TmuxMultiplexer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        TmuxMultiplexer {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run tmux with a hard deadline. `None` means the run could not
    /// complete (spawn failure or timeout). Stdout is drained on a helper
    /// thread so a chatty child never stalls on a full pipe.
    fn run(&self, args: &[&str], capture_stdout: bool) -> Option<(bool, String)> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| debug!(error = %e, binary = %self.binary.display(), "tmux spawn failed"))
            .ok()?;

        let reader = child.stdout.take().map(|stdout| {
            thread::spawn(move || {
                let mut output = Vec::new();
                let mut stdout = stdout;
                let _ = (&mut stdout).take(MAX_STDOUT_BYTES).read_to_end(&mut output);
                // Keep draining past the cap so the child can exit normally.
                let _ = std::io::copy(&mut stdout, &mut std::io::sink());
                output
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "tmux wait failed");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
            }
            if Instant::now() >= deadline {
                warn!(args = ?args, timeout_ms = self.timeout.as_millis() as u64, "tmux timed out");
                let _ = child.kill();
                let _ = child.wait();
                // A reader still blocked on a pipe held by a descendant is abandoned.
                return None;
            }
            thread::sleep(REAP_POLL_INTERVAL);
        };

        let stdout = match reader {
            Some(handle) => handle
                .join()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
            None => String::new(),
        };
        Some((status.success(), stdout))
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn has_session(&self, session: &str) -> Liveness {
        match self.run(&["has-session", "-t", &exact_target(session)], false) {
            Some((true, _)) => Liveness::Live,
            Some((false, _)) => Liveness::NotLive,
            None => Liveness::Unknown,
        }
    }

    fn pane_title(&self, pane: &str) -> Option<String> {
        match self.run(&["display-message", "-t", pane, "-p", "#{pane_title}"], true) {
            Some((true, out)) => Some(out.trim().to_string()),
            _ => None,
        }
    }
}

/// Collapses multiplexer answers into the yes/no the policy needs.
pub struct ReconciliationOracle<'a> {
    mux: &'a dyn Multiplexer,
}

impl<'a> ReconciliationOracle<'a> {
    pub fn new(mux: &'a dyn Multiplexer) -> Self {
        ReconciliationOracle { mux }
    }

    pub fn probe(&self, session: &str) -> Liveness {
        self.mux.has_session(session)
    }

    /// `Unknown` counts as not live.
    pub fn is_live(&self, session: &str) -> bool {
        match self.probe(session) {
            Liveness::Live => true,
            Liveness::NotLive => false,
            Liveness::Unknown => {
                warn!(session, "liveness unknown; treating session as not live");
                false
            }
        }
    }

    /// True when the current process runs inside a pane of an agent that ntm
    /// spawned. Those agents are not subject to the orchestrator's gate.
    pub fn is_spawned_agent_pane(&self, tmux: Option<&str>, pane: Option<&str>) -> bool {
        let (Some(tmux), Some(pane)) = (tmux, pane) else {
            return false;
        };
        if tmux.is_empty() || pane.is_empty() {
            return false;
        }
        self.mux
            .pane_title(pane)
            .is_some_and(|title| is_spawned_agent_title(&title))
    }
}

/// tmux resolves a bare `-t name` by prefix when no exact match exists; `=`
/// forces an exact session-name match.
fn exact_target(session: &str) -> String {
    format!("={}", session)
}

pub fn is_spawned_agent_title(title: &str) -> bool {
    SPAWNED_AGENT_PANE.is_match(title)
}
