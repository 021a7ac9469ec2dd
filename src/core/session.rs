//! Sanitized session identifiers.
//!
//! Every per-session path under the runtime root is derived from a
//! [`SessionName`], so arbitrary input can never traverse out of it.

use crate::core::error::GateError;
use crate::core::limits::{GLOBAL_SCOPE, SESSION_NAME_MAX_LENGTH};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionName(String);

impl SessionName {
    /// Sanitize `raw`: trim, replace anything outside `[A-Za-z0-9_.-]` with
    /// `_`, cap at 128 characters.
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let cleaned = sanitize(raw);
        if cleaned.is_empty() {
            return Err(GateError::validation("Invalid empty session name"));
        }
        if cleaned == "." || cleaned == ".." {
            return Err(GateError::validation(format!(
                "Invalid session name '{}'",
                cleaned
            )));
        }
        Ok(SessionName(cleaned))
    }

    /// The reserved pseudo-session that owns session-less state.
    pub fn global() -> Self {
        SessionName(GLOBAL_SCOPE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(SESSION_NAME_MAX_LENGTH)
        .collect()
}
