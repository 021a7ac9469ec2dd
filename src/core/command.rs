//! Command-line classification.
//!
//! A raw shell command is scanned once and reduced to the facts the gate
//! acts on. Matching is textual: a compound command (`a && b`) can yield
//! several facts at once, and the gate applies them in rule order.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static BARE_BV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*bv\s*$").unwrap());
static BV_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bbv\b").unwrap());
static BV_ROBOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bbv\b[^\n]*--robot-").unwrap());
static NTM_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bntm\b").unwrap());
static NTM_ROBOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bntm\b\s+--robot-").unwrap());
static NTM_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bntm\b\s+(--help|-h|--version|version)\b").unwrap());
// Subcommands with no robot-mode equivalent.
static NTM_ALLOWLISTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bntm\b\s+(send|kill|save|preflight)\b").unwrap());
static SPAWN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bntm\b\s+--robot-spawn=([^\s]+)").unwrap());
static INLINE_MSG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)--msg=(?:"(.*?)"|'(.*?)')"#).unwrap());
static POLL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bntm\b\s+--robot-(terse|status|tail|health|snapshot)(=([^\s]+))?\b").unwrap()
});
static SAVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bntm\b\s+save\s+([^\s]+)").unwrap());
static KILL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bntm\b\s+kill\s+([^\s]+)").unwrap());

/// Rate-limited robot operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
    Terse,
    Status,
    Tail,
    Health,
    Snapshot,
}

impl PollKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PollKind::Terse => "terse",
            PollKind::Status => "status",
            PollKind::Tail => "tail",
            PollKind::Health => "health",
            PollKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for PollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terse" => Ok(PollKind::Terse),
            "status" => Ok(PollKind::Status),
            "tail" => Ok(PollKind::Tail),
            "health" => Ok(PollKind::Health),
            "snapshot" => Ok(PollKind::Snapshot),
            other => Err(format!("unknown poll kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest<'a> {
    pub kind: PollKind,
    /// Session named on the command line; `None` for session-less polls.
    pub session: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFacts<'a> {
    /// The whole command is `bv`.
    pub bare_bv: bool,
    /// `bv` appears without `--robot-` after it on the same line.
    pub bv_without_robot: bool,
    pub mentions_ntm: bool,
    /// `ntm` is invoked in robot mode, informationally, or via an
    /// allowlisted subcommand.
    pub ntm_mode_allowed: bool,
    pub spawn: Option<&'a str>,
    pub inline_msg: Option<&'a str>,
    pub poll: Option<PollRequest<'a>>,
    pub save: Option<&'a str>,
    pub kill: Option<&'a str>,
}

impl<'a> CommandFacts<'a> {
    pub fn classify(cmd: &'a str) -> Self {
        let mentions_ntm = NTM_WORD.is_match(cmd);
        let ntm_mode_allowed = mentions_ntm
            && (NTM_ROBOT.is_match(cmd) || NTM_INFO.is_match(cmd) || NTM_ALLOWLISTED.is_match(cmd));

        let poll = POLL.captures(cmd).and_then(|caps| {
            let kind = caps.get(1)?.as_str().parse().ok()?;
            Some(PollRequest {
                kind,
                session: caps.get(3).map(|m| m.as_str()),
            })
        });

        let inline_msg = INLINE_MSG
            .captures(cmd)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str());

        CommandFacts {
            bare_bv: BARE_BV.is_match(cmd),
            bv_without_robot: BV_WORD.is_match(cmd) && !BV_ROBOT.is_match(cmd),
            mentions_ntm,
            ntm_mode_allowed,
            spawn: first_capture(&SPAWN, cmd),
            inline_msg,
            poll,
            save: first_capture(&SAVE, cmd),
            kill: first_capture(&KILL, cmd),
        }
    }

    /// Nothing tracked is present; the gate has no reason to look further.
    pub fn is_untracked(&self) -> bool {
        !self.bare_bv
            && !self.bv_without_robot
            && !self.mentions_ntm
            && self.inline_msg.is_none()
    }
}

fn first_capture<'a>(re: &Regex, cmd: &'a str) -> Option<&'a str> {
    re.captures(cmd).and_then(|c| c.get(1)).map(|m| m.as_str())
}
