//! Minimum-interval rate limiting for robot polls.
//!
//! One ledger file per scope maps `"<scope>|<kind>"` to the epoch-ms time of
//! the last accepted poll. A refused poll leaves the ledger untouched, so the
//! caller may retry as soon as the window has truly elapsed.

use crate::core::command::PollKind;
use crate::core::error::GateError;
use crate::core::limits::{
    GLOBAL_SCOPE, HEALTH_GRACE_INTERVAL_SECS, HEALTH_GRACE_WINDOW_MS, MIN_POLL_INTERVAL_SECS,
};
use crate::core::session::SessionName;
use crate::core::store::RuntimeStore;
use crate::core::time;
use crate::plugins::registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollLedger {
    #[serde(default)]
    pub last_poll_ms: BTreeMap<String, i64>,
}

/// Who a poll is attributed to. Session-less polls never borrow the active
/// session's cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollScope {
    Global,
    Session(SessionName),
}

impl PollScope {
    pub fn from_command(session: Option<&str>) -> Result<Self, GateError> {
        match session {
            None => Ok(PollScope::Global),
            Some(raw) => SessionName::parse(raw).map(PollScope::Session),
        }
    }

    fn ledger_owner(&self) -> SessionName {
        match self {
            PollScope::Session(name) => name.clone(),
            PollScope::Global => SessionName::global(),
        }
    }
}

impl fmt::Display for PollScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollScope::Global => f.write_str(GLOBAL_SCOPE),
            PollScope::Session(name) => f.write_str(name.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Accepted {
        key: String,
        min_interval_secs: u64,
    },
    TooFast {
        key: String,
        delta_secs: f64,
        min_interval_secs: u64,
    },
}

impl PollOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PollOutcome::Accepted { .. })
    }
}

pub fn ledger_key(scope: &PollScope, kind: PollKind) -> String {
    format!("{}|{}", scope, kind)
}

pub struct PollThrottle<'a> {
    store: &'a RuntimeStore,
}

impl<'a> PollThrottle<'a> {
    pub fn new(store: &'a RuntimeStore) -> Self {
        PollThrottle { store }
    }

    /// Minimum spacing for `kind` in `scope` at `now`: the baseline, or the
    /// short health interval inside the post-spawn grace window.
    pub fn min_interval_secs(&self, scope: &PollScope, kind: PollKind, now: DateTime<Utc>) -> u64 {
        let PollScope::Session(session) = scope else {
            return MIN_POLL_INTERVAL_SECS;
        };
        if kind != PollKind::Health {
            return MIN_POLL_INTERVAL_SECS;
        }
        match registry::spawned_at(self.store, session) {
            Some(spawned) if (now - spawned).num_milliseconds() <= HEALTH_GRACE_WINDOW_MS => {
                HEALTH_GRACE_INTERVAL_SECS
            }
            _ => MIN_POLL_INTERVAL_SECS,
        }
    }

    pub fn check_and_record(
        &self,
        scope: &PollScope,
        kind: PollKind,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome, GateError> {
        let key = ledger_key(scope, kind);
        let min_interval_secs = self.min_interval_secs(scope, kind, now);
        let ledger_path = self.store.poll_ledger_path(&scope.ledger_owner());

        // A corrupt ledger is rebuilt from scratch by the write below.
        let mut ledger = match self.store.read_record::<PollLedger>(&ledger_path) {
            Ok(ledger) => ledger.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "resetting unreadable poll ledger");
                PollLedger::default()
            }
        };

        let now_ms = time::epoch_ms(now);
        let last = ledger.last_poll_ms.get(&key).copied().unwrap_or(0);
        let delta_secs = (now_ms - last) as f64 / 1000.0;
        if last > 0 && delta_secs < min_interval_secs as f64 {
            debug!(key = %key, delta_secs, min_interval_secs, "poll refused");
            return Ok(PollOutcome::TooFast {
                key,
                delta_secs,
                min_interval_secs,
            });
        }

        ledger.last_poll_ms.insert(key.clone(), now_ms);
        if let Err(e) = self.store.write_record(&ledger_path, &ledger) {
            warn!(error = %e, key = %key, "failed to persist poll ledger");
        }
        Ok(PollOutcome::Accepted {
            key,
            min_interval_secs,
        })
    }

    pub fn ledger(&self, scope: &PollScope) -> Option<PollLedger> {
        self.store
            .read_record(&self.store.poll_ledger_path(&scope.ledger_owner()))
            .ok()
            .flatten()
    }
}
