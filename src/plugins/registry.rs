//! Session registry: which session is active, and when it was spawned.

use crate::core::error::GateError;
use crate::core::session::SessionName;
use crate::core::store::RuntimeStore;
use crate::core::time;
use crate::plugins::oracle::ReconciliationOracle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Singleton record naming the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIndex {
    #[serde(default)]
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: String,
    pub spawned_at: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        /// A dead session whose index was discarded to make room.
        replaced_stale: Option<String>,
    },
    Refused {
        active: String,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub index_cleared: bool,
    /// Files that could not be removed; teardown continues past them.
    pub failures: Vec<String>,
}

/// Spawn time recorded for `session`; `None` when missing or unparseable.
pub fn spawned_at(store: &RuntimeStore, session: &SessionName) -> Option<DateTime<Utc>> {
    store
        .read_record::<SessionState>(&store.state_path(session))
        .ok()
        .flatten()
        .and_then(|state| time::parse_iso(&state.spawned_at))
}

pub struct SessionRegistry<'a> {
    store: &'a RuntimeStore,
    oracle: &'a ReconciliationOracle<'a>,
}

impl<'a> SessionRegistry<'a> {
    pub fn new(store: &'a RuntimeStore, oracle: &'a ReconciliationOracle<'a>) -> Self {
        SessionRegistry { store, oracle }
    }

    /// Read the global index. A corrupt index is deleted and reported as
    /// absent.
    pub fn active(&self) -> Option<GlobalIndex> {
        self.store
            .load_or_heal::<GlobalIndex>(&self.store.global_index_path())
    }

    pub fn state(&self, session: &SessionName) -> Option<SessionState> {
        self.store
            .read_record::<SessionState>(&self.store.state_path(session))
            .ok()
            .flatten()
    }

    pub fn spawned_at(&self, session: &SessionName) -> Option<DateTime<Utc>> {
        spawned_at(self.store, session)
    }

    /// Admit `session` as the active one. Another live session refuses the
    /// admission; a dead one is discarded first.
    pub fn admit(
        &self,
        session: &SessionName,
        now: DateTime<Utc>,
        pid: u32,
    ) -> Result<Admission, GateError> {
        self.store.ensure_session_dir(session)?;

        let mut replaced_stale = None;
        if let Some(existing) = self.active() {
            if !existing.session.is_empty() && existing.session != session.as_str() {
                if self.oracle.is_live(&existing.session) {
                    return Ok(Admission::Refused {
                        active: existing.session,
                    });
                }
                info!(stale = %existing.session, new = %session, "discarding stale active-session index");
                self.discard_stale(&existing.session);
                replaced_stale = Some(existing.session);
            }
        }

        let state = SessionState {
            session: session.to_string(),
            spawned_at: time::to_iso(now),
            pid,
        };
        if let Err(e) = self
            .store
            .write_record(&self.store.state_path(session), &state)
        {
            warn!(error = %e, session = %session, "failed to write session state");
        }
        let index = GlobalIndex {
            session: session.to_string(),
        };
        if let Err(e) = self
            .store
            .write_record(&self.store.global_index_path(), &index)
        {
            warn!(error = %e, session = %session, "failed to write active-session index");
        }
        info!(session = %session, "session admitted");
        Ok(Admission::Admitted { replaced_stale })
    }

    fn discard_stale(&self, stale: &str) {
        if let Err(e) = self
            .store
            .delete_owned_file(&self.store.global_index_path())
        {
            warn!(error = %e, "failed to delete stale index");
        }
        match SessionName::parse(stale) {
            Ok(name) => {
                if let Err(e) = self.store.delete_owned_file(&self.store.state_path(&name)) {
                    warn!(error = %e, session = %name, "failed to delete stale session state");
                }
            }
            Err(e) => warn!(error = %e, "stale index names an invalid session"),
        }
    }

    /// Tear down every record of `session`; the index is cleared only while
    /// it still names this session.
    pub fn release(&self, session: &SessionName) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for path in [
            self.store.state_path(session),
            self.store.poll_ledger_path(session),
            self.store.capture_marker_path(session),
        ] {
            if let Err(e) = self.store.delete_owned_file(&path) {
                warn!(error = %e, path = %path.display(), "failed to delete session record");
                report.failures.push(path.display().to_string());
            }
        }

        let index_path = self.store.global_index_path();
        if let Ok(Some(index)) = self.store.read_record::<GlobalIndex>(&index_path) {
            if index.session == session.as_str() {
                match self.store.delete_owned_file(&index_path) {
                    Ok(()) => report.index_cleared = true,
                    Err(e) => {
                        warn!(error = %e, "failed to clear active-session index");
                        report.failures.push(index_path.display().to_string());
                    }
                }
            }
        }
        report
    }

    /// Remove the index unconditionally, or only when it names `only_if`.
    /// Returns the session the removed index named.
    pub fn clear_index(&self, only_if: Option<&SessionName>) -> Result<Option<String>, GateError> {
        let index_path = self.store.global_index_path();
        let current = match self.store.read_record::<GlobalIndex>(&index_path) {
            Ok(index) => index.map(|i| i.session),
            Err(GateError::StateCorruption { .. }) => Some(String::new()),
            Err(e) => return Err(e),
        };
        let Some(current) = current else {
            return Ok(None);
        };
        if let Some(expected) = only_if {
            if current != expected.as_str() {
                return Ok(None);
            }
        }
        self.store.delete_owned_file(&index_path)?;
        Ok(Some(current))
    }
}
