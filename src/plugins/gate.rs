//! Policy gate: the pre-tool-use and stop intercepts.
//!
//! Rules run in a fixed order over one command line and the first block ends
//! the invocation, so state is only mutated by rules the command reaches.
//! Unsafe storage fails closed; every other unexpected error fails open.

use crate::core::command::CommandFacts;
use crate::core::error::{Disposition, GateError};
use crate::core::hook::{Decision, HookInput};
use crate::core::limits::MAX_INLINE_MSG_CHARS;
use crate::core::output::compact_line;
use crate::core::session::SessionName;
use crate::core::store::RuntimeStore;
use crate::plugins::capture::{CaptureGuard, DestroyAuthorization};
use crate::plugins::oracle::{Multiplexer, ReconciliationOracle};
use crate::plugins::registry::{Admission, GlobalIndex, SessionRegistry};
use crate::plugins::throttle::{PollOutcome, PollScope, PollThrottle};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

const GATED_TOOL: &str = "Bash";

pub struct PolicyGate<'a> {
    store: &'a RuntimeStore,
    oracle: ReconciliationOracle<'a>,
    now: DateTime<Utc>,
    pid: u32,
}

impl<'a> PolicyGate<'a> {
    pub fn new(
        store: &'a RuntimeStore,
        mux: &'a dyn Multiplexer,
        now: DateTime<Utc>,
        pid: u32,
    ) -> Self {
        PolicyGate {
            store,
            oracle: ReconciliationOracle::new(mux),
            now,
            pid,
        }
    }

    /// Agents spawned by ntm run inside panes the orchestrator owns; the gate
    /// applies to the orchestrator only.
    pub fn is_spawned_agent(&self, tmux: Option<&str>, pane: Option<&str>) -> bool {
        self.oracle.is_spawned_agent_pane(tmux, pane)
    }

    pub fn pre_tool_use(&self, input: &HookInput) -> Decision {
        if input.tool_name != GATED_TOOL {
            return Decision::Allow;
        }
        let cmd = input.command();
        if cmd.trim().is_empty() {
            return Decision::Allow;
        }
        settle(self.evaluate_command(cmd))
    }

    pub fn evaluate_command(&self, cmd: &str) -> Result<Decision, GateError> {
        let facts = CommandFacts::classify(cmd);
        if facts.is_untracked() {
            return Ok(Decision::Allow);
        }
        debug!(command = %compact_line(cmd, 120), "evaluating command");

        if facts.bare_bv {
            return Ok(Decision::block(
                "Bare bv launches TUI and blocks. Use: ntm --robot-plan or bv --robot-<...>.",
            ));
        }
        if facts.bv_without_robot {
            return Ok(Decision::block(
                "bv without --robot-* may launch TUI. Use: bv --robot-triage / bv --robot-plan, or prefer ntm --robot-plan.",
            ));
        }

        if facts.mentions_ntm {
            if let Err(e) = self.store.ensure_root() {
                return Ok(Decision::block(format!(
                    "Runtime directory is not secure: {}",
                    e.detail()
                )));
            }
            if !facts.ntm_mode_allowed {
                return Ok(Decision::block(
                    "Non-robot ntm invocations are disallowed for orchestration. Use robot mode or one of the allowed subcommands (send, kill, save).",
                ));
            }
        }

        if let Some(raw) = facts.spawn {
            if let Some(block) = self.admit(raw)? {
                return Ok(block);
            }
        }

        if let Some(msg) = facts.inline_msg {
            if msg.chars().count() > MAX_INLINE_MSG_CHARS {
                return Ok(Decision::block(format!(
                    "Inline --msg exceeds {} chars. Write to {}/<session>/pane-<N>.md and send with --msg-file (robot) or --file (ntm send).",
                    MAX_INLINE_MSG_CHARS,
                    self.store.root().display()
                )));
            }
        }

        if let Some(poll) = facts.poll {
            let scope = PollScope::from_command(poll.session)?;
            let outcome = PollThrottle::new(self.store).check_and_record(&scope, poll.kind, self.now)?;
            if let PollOutcome::TooFast {
                key,
                delta_secs,
                min_interval_secs,
            } = outcome
            {
                return Ok(Decision::block(format!(
                    "Polling too fast for {} ({:.1}s). Minimum is {}s.",
                    key, delta_secs, min_interval_secs
                )));
            }
        }

        if let Some(raw) = facts.save {
            let session = parse_session(raw, "ntm save")?;
            let guard = CaptureGuard::new(self.store);
            if let Err(e) = guard.record_capture(&session, cmd, self.now) {
                return Ok(Decision::block(format!(
                    "Session runtime path is not secure: {}",
                    e.detail()
                )));
            }
        }

        if let Some(raw) = facts.kill {
            let session = parse_session(raw, "ntm kill")?;
            match CaptureGuard::new(self.store).authorize_destroy(&session, self.now) {
                DestroyAuthorization::Refused(refusal) => {
                    info!(session = %session, reason = ?refusal.reason, "kill refused");
                    return Ok(Decision::block(refusal.message()));
                }
                DestroyAuthorization::Authorized { .. } => {
                    let report = SessionRegistry::new(self.store, &self.oracle).release(&session);
                    info!(session = %session, index_cleared = report.index_cleared, "session released");
                }
            }
        }

        Ok(Decision::Allow)
    }

    fn admit(&self, raw: &str) -> Result<Option<Decision>, GateError> {
        let session = parse_session(raw, "--robot-spawn")?;
        let registry = SessionRegistry::new(self.store, &self.oracle);
        match registry.admit(&session, self.now, self.pid) {
            Ok(Admission::Admitted { .. }) => Ok(None),
            Ok(Admission::Refused { active }) => Ok(Some(Decision::block(format!(
                "Another NTM session is already active ({}). Capture and kill it before spawning a new one.",
                active
            )))),
            Err(e) => Ok(Some(Decision::block(format!(
                "Session runtime path is not secure: {}",
                e.detail()
            )))),
        }
    }

    /// Stop intercept: block only while tmux confirms the indexed session is
    /// alive. Any stale, corrupt or unverifiable index is removed and the
    /// stop allowed.
    pub fn stop(&self) -> Decision {
        if let Err(e) = self.store.ensure_root() {
            warn!(error = %e, "runtime dir unusable; allowing stop");
            return Decision::Allow;
        }
        let index_path = self.store.global_index_path();
        let index = match self.store.read_record::<GlobalIndex>(&index_path) {
            Ok(None) => return Decision::Allow,
            Ok(Some(index)) => index,
            Err(e) => {
                warn!(error = %e, "corrupt active-session index; removing");
                self.discard_index();
                return Decision::Allow;
            }
        };
        if index.session.is_empty() {
            self.discard_index();
            return Decision::Allow;
        }
        if !self.oracle.is_live(&index.session) {
            info!(session = %index.session, "active-session index is stale; removing");
            self.discard_index();
            return Decision::Allow;
        }
        Decision::block(format!(
            "An NTM tmux session is still active (session: {}).\n\
             \n\
             To proceed, either:\n  \
             - Complete your capture/cleanup workflow, then stop again, or\n  \
             - If you intentionally want to leave it running, clear the active-session marker.\n\
             \n\
             (Note: this hook blocks only when tmux confirms the session still exists.)",
            index.session
        ))
    }

    fn discard_index(&self) {
        if let Err(e) = self
            .store
            .delete_owned_file(&self.store.global_index_path())
        {
            warn!(error = %e, "failed to remove active-session index");
        }
    }
}

fn parse_session(raw: &str, context: &str) -> Result<SessionName, GateError> {
    SessionName::parse(raw)
        .map_err(|e| GateError::validation(format!("{} for {}.", e.detail(), context)))
}

/// Turn an evaluation result into exactly one decision.
pub fn settle(result: Result<Decision, GateError>) -> Decision {
    match result {
        Ok(decision) => decision,
        Err(e) => match e.disposition() {
            Disposition::FailClosed => Decision::block(e.detail()),
            Disposition::FailOpen => {
                warn!(error = %e, "gate error; failing open");
                Decision::Allow
            }
        },
    }
}
