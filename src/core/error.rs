use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Security violation: {0}")]
    SecurityViolation(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Corrupt state record {path}: {reason}")]
    StateCorruption { path: String, reason: String },
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// How an intercept must react when an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Unsafe storage or invalid input: the intercept blocks.
    FailClosed,
    /// Anything else: the intercept allows so a gate bug never wedges the host.
    FailOpen,
}

impl GateError {
    pub fn disposition(&self) -> Disposition {
        match self {
            GateError::SecurityViolation(_) | GateError::ValidationError(_) => {
                Disposition::FailClosed
            }
            GateError::StateCorruption { .. }
            | GateError::IoError(_)
            | GateError::JsonError(_)
            | GateError::ConfigError(_) => Disposition::FailOpen,
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        GateError::SecurityViolation(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GateError::ValidationError(message.into())
    }

    /// The bare message without the variant prefix, for block diagnostics.
    pub fn detail(&self) -> String {
        match self {
            GateError::SecurityViolation(msg)
            | GateError::ValidationError(msg)
            | GateError::ConfigError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
