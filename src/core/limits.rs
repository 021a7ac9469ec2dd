//! Fixed policy constants shared by every intercept.

/// Longest inline `--msg` payload accepted before `--msg-file` is required.
pub const MAX_INLINE_MSG_CHARS: usize = 2000;
/// Baseline minimum spacing between two polls of the same kind.
pub const MIN_POLL_INTERVAL_SECS: u64 = 90;
/// Minimum spacing for `health` polls shortly after a spawn.
pub const HEALTH_GRACE_INTERVAL_SECS: u64 = 10;
/// How long after a spawn the health grace interval applies.
pub const HEALTH_GRACE_WINDOW_MS: i64 = 180_000;
/// Capture markers older than this no longer authorize a kill.
pub const SAVE_MARKER_TTL_MIN: i64 = 60;
pub const SESSION_NAME_MAX_LENGTH: usize = 128;
pub const MARKER_COMMAND_MAX_CHARS: usize = 200;
pub const ORACLE_TIMEOUT_MS: u64 = 2000;

/// Pseudo-session that owns session-less polls.
pub const GLOBAL_SCOPE: &str = "__global__";
