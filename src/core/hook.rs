//! Hook wire format: one JSON request on stdin, an exit status plus a stderr
//! diagnostic out.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::io::{self, Read, Write};

pub const EXIT_ALLOW: i32 = 0;
pub const EXIT_BLOCK: i32 = 2;

/// Request delivered to an intercept. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: JsonValue,
    #[serde(default)]
    pub hook_event_name: Option<String>,
}

impl HookInput {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// The raw command line for shell tools; empty when absent or not a
    /// string.
    pub fn command(&self) -> &str {
        self.tool_input
            .get("command")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
    }

    /// True when the request carries an event name other than `expected`.
    /// Requests without one are taken as addressed to the running intercept.
    pub fn is_for_other_event(&self, expected: &str) -> bool {
        self.hook_event_name
            .as_deref()
            .is_some_and(|name| name != expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(String),
}

impl Decision {
    pub fn block(message: impl Into<String>) -> Self {
        Decision::Block(message.into())
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Decision::Allow => EXIT_ALLOW,
            Decision::Block(_) => EXIT_BLOCK,
        }
    }

    /// Diagnostic for stderr; allows are silent.
    pub fn render(&self) -> Option<String> {
        match self {
            Decision::Allow => None,
            Decision::Block(msg) => Some(format!("BLOCKED: {}\n", msg)),
        }
    }

    pub fn emit(&self, err: &mut impl Write) -> io::Result<()> {
        if let Some(text) = self.render() {
            err.write_all(text.as_bytes())?;
            err.flush()?;
        }
        Ok(())
    }
}

/// Read the whole request; an unreadable stdin yields `None` (fail open).
pub fn read_input(reader: &mut impl Read) -> Option<HookInput> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw).ok()?;
    HookInput::parse(&raw)
}
