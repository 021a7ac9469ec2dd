//! Capture-before-kill enforcement.
//!
//! `ntm save <session>` leaves a marker; `ntm kill <session>` is only
//! authorized while a fresh marker exists. The guard gates, it never kills.

use crate::core::error::GateError;
use crate::core::limits::{MARKER_COMMAND_MAX_CHARS, SAVE_MARKER_TTL_MIN};
use crate::core::output::truncate_chars;
use crate::core::session::SessionName;
use crate::core::store::RuntimeStore;
use crate::core::time;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMarker {
    pub session: String,
    pub saved_at: String,
    #[serde(default)]
    pub save_attempted: bool,
    /// Optimistic: the guard cannot see whether `ntm save` succeeded; a failed
    /// save surfaces through the command's own exit status.
    #[serde(default)]
    pub save_succeeded: bool,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    NoMarker,
    UnparseableTimestamp,
    Expired,
    SaveNotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyRefusal {
    pub session: SessionName,
    pub reason: RefusalReason,
}

impl DestroyRefusal {
    /// The command that would satisfy the guard.
    pub fn remediation(&self) -> String {
        format!("ntm save {} -o ./outputs", self.session)
    }

    pub fn message(&self) -> String {
        format!(
            "Cannot kill session '{}' without capturing output first.\n\
             \n\
             Run this command first:\n  {}\n\
             \n\
             Then retry the kill. This ensures agent work is preserved before termination.",
            self.session,
            self.remediation()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyAuthorization {
    Authorized { marker: CaptureMarker },
    Refused(DestroyRefusal),
}

impl DestroyAuthorization {
    pub fn is_authorized(&self) -> bool {
        matches!(self, DestroyAuthorization::Authorized { .. })
    }
}

pub struct CaptureGuard<'a> {
    store: &'a RuntimeStore,
    ttl: Duration,
}

impl<'a> CaptureGuard<'a> {
    pub fn new(store: &'a RuntimeStore) -> Self {
        Self::with_ttl(store, Duration::minutes(SAVE_MARKER_TTL_MIN))
    }

    pub fn with_ttl(store: &'a RuntimeStore, ttl: Duration) -> Self {
        CaptureGuard { store, ttl }
    }

    /// Record that a capture ran for `session`. Failing to secure the session
    /// directory is fatal; failing to write the marker is only logged.
    pub fn record_capture(
        &self,
        session: &SessionName,
        command: &str,
        now: DateTime<Utc>,
    ) -> Result<CaptureMarker, GateError> {
        self.store.ensure_session_dir(session)?;
        let marker = CaptureMarker {
            session: session.to_string(),
            saved_at: time::to_iso(now),
            save_attempted: true,
            save_succeeded: true,
            command: truncate_chars(command, MARKER_COMMAND_MAX_CHARS),
        };
        if let Err(e) = self
            .store
            .write_record(&self.store.capture_marker_path(session), &marker)
        {
            warn!(error = %e, session = %session, "failed to write capture marker");
        }
        debug!(session = %session, "capture recorded");
        Ok(marker)
    }

    pub fn marker(&self, session: &SessionName) -> Option<CaptureMarker> {
        self.store
            .read_record(&self.store.capture_marker_path(session))
            .unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable capture marker");
                None
            })
    }

    pub fn authorize_destroy(&self, session: &SessionName, now: DateTime<Utc>) -> DestroyAuthorization {
        let refuse = |reason| {
            DestroyAuthorization::Refused(DestroyRefusal {
                session: session.clone(),
                reason,
            })
        };
        let Some(marker) = self.marker(session) else {
            return refuse(RefusalReason::NoMarker);
        };
        let Some(saved_at) = time::parse_iso(&marker.saved_at) else {
            return refuse(RefusalReason::UnparseableTimestamp);
        };
        if now - saved_at > self.ttl {
            return refuse(RefusalReason::Expired);
        }
        if !marker.save_attempted {
            return refuse(RefusalReason::SaveNotAttempted);
        }
        DestroyAuthorization::Authorized { marker }
    }
}
