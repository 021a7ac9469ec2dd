#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ntm_orch::core::hook::HookInput;
use ntm_orch::core::store::RuntimeStore;
use ntm_orch::plugins::oracle::{Liveness, Multiplexer};
use std::cell::RefCell;
use std::collections::BTreeSet;
use tempfile::TempDir;

/// In-memory tmux: a set of live sessions and an optional pane title.
pub struct FakeTmux {
    live: RefCell<BTreeSet<String>>,
    reachable: bool,
    pane_title: Option<String>,
}

impl FakeTmux {
    pub fn new() -> Self {
        FakeTmux {
            live: RefCell::new(BTreeSet::new()),
            reachable: true,
            pane_title: None,
        }
    }

    pub fn with_live(sessions: &[&str]) -> Self {
        let fake = Self::new();
        for s in sessions {
            fake.start(s);
        }
        fake
    }

    /// Every query times out.
    pub fn unreachable() -> Self {
        FakeTmux {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn with_pane_title(title: &str) -> Self {
        FakeTmux {
            pane_title: Some(title.to_string()),
            ..Self::new()
        }
    }

    pub fn start(&self, session: &str) {
        self.live.borrow_mut().insert(session.to_string());
    }

    pub fn kill(&self, session: &str) {
        self.live.borrow_mut().remove(session);
    }
}

impl Multiplexer for FakeTmux {
    fn has_session(&self, session: &str) -> Liveness {
        if !self.reachable {
            return Liveness::Unknown;
        }
        if self.live.borrow().contains(session) {
            Liveness::Live
        } else {
            Liveness::NotLive
        }
    }

    fn pane_title(&self, _pane: &str) -> Option<String> {
        self.pane_title.clone()
    }
}

/// A runtime root that does not exist yet, under a fresh tempdir.
pub fn runtime() -> (TempDir, RuntimeStore) {
    let tmp = TempDir::new().expect("tempdir");
    let store = RuntimeStore::new(tmp.path().join("runtime"));
    (tmp, store)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn at_secs(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn bash(command: &str) -> HookInput {
    HookInput::parse(
        &serde_json::json!({
            "tool_name": "Bash",
            "tool_input": { "command": command },
            "session_id": "test",
        })
        .to_string(),
    )
    .expect("hook input")
}
