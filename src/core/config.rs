//! Runtime configuration.
//!
//! Defaults are derived from the environment; an optional TOML file named by
//! `NTM_ORCH_CONFIG` overlays them, and `NTM_ORCH_RUNTIME_DIR` wins over both.

use crate::core::error::GateError;
use crate::core::limits::ORACLE_TIMEOUT_MS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const RUNTIME_DIR_ENV: &str = "NTM_ORCH_RUNTIME_DIR";
pub const CONFIG_FILE_ENV: &str = "NTM_ORCH_CONFIG";
pub const LOG_FILTER_ENV: &str = "NTM_ORCH_LOG";

const TMUX_CANDIDATES: &[&str] = &[
    "/usr/bin/tmux",
    "/opt/homebrew/bin/tmux",
    "/usr/local/bin/tmux",
];

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub runtime_dir: PathBuf,
    pub tmux_path: PathBuf,
    pub oracle_timeout: Duration,
}

/// On-disk overlay; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub runtime_dir: Option<PathBuf>,
    pub tmux_path: Option<PathBuf>,
    pub oracle_timeout_ms: Option<u64>,
}

impl GateConfig {
    /// Resolve configuration from the process environment. A broken config
    /// file is logged and ignored.
    pub fn from_env() -> Self {
        let overlay = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) if !path.is_empty() => {
                match FileConfig::load(Path::new(&path)) {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(error = %e, "ignoring unreadable config file");
                        FileConfig::default()
                    }
                }
            }
            _ => FileConfig::default(),
        };
        let env_runtime = std::env::var_os(RUNTIME_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::resolve(overlay, env_runtime)
    }

    pub fn resolve(file: FileConfig, env_runtime_dir: Option<PathBuf>) -> Self {
        let runtime_dir = env_runtime_dir
            .or(file.runtime_dir)
            .unwrap_or_else(default_runtime_dir);
        GateConfig {
            runtime_dir: absolutize(&runtime_dir),
            tmux_path: file.tmux_path.unwrap_or_else(discover_tmux),
            oracle_timeout: Duration::from_millis(
                file.oracle_timeout_ms.unwrap_or(ORACLE_TIMEOUT_MS),
            ),
        }
    }

    /// Configuration rooted at `runtime_dir` with default tooling; used by
    /// tests and embedders.
    pub fn with_runtime_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        Self::resolve(FileConfig::default(), Some(runtime_dir.into()))
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| {
            GateError::ConfigError(format!("{}: {}", path.display(), e.detail()))
        })
    }

    pub fn parse(content: &str) -> Result<Self, GateError> {
        toml::from_str(content).map_err(|e| GateError::ConfigError(e.to_string()))
    }
}

pub fn current_uid_label() -> String {
    #[cfg(unix)]
    {
        crate::core::store::current_uid().to_string()
    }
    #[cfg(not(unix))]
    {
        "unknown".to_string()
    }
}

pub fn default_runtime_dir() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    base.join(format!("ntm-orch-{}", current_uid_label()))
}

/// First executable tmux among the well-known locations, else `tmux` on PATH.
pub fn discover_tmux() -> PathBuf {
    TMUX_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
        .unwrap_or_else(|| PathBuf::from("tmux"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
