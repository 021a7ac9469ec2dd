//! Runtime store: the private, permission-hardened directory that holds all
//! session state for one user.
//!
//! Every mutation is a write-then-rename of a whole JSON record, so readers
//! only ever observe complete documents. Nothing here takes a lock; isolation
//! between users comes from the ownership and mode checks on the directory.

use crate::core::error::GateError;
use crate::core::session::SessionName;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use ulid::Ulid;

const GLOBAL_INDEX_FILE: &str = "active-session.json";
const STATE_FILE: &str = "state.json";
const POLL_LEDGER_FILE: &str = "hook-last-poll.json";
const CAPTURE_MARKER_FILE: &str = "saved.json";

/// Handle on the runtime root. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    root: PathBuf,
}

impl RuntimeStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        RuntimeStore {
            root: normalize_lexically(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_index_path(&self) -> PathBuf {
        self.root.join(GLOBAL_INDEX_FILE)
    }

    pub fn session_dir(&self, session: &SessionName) -> PathBuf {
        self.root.join(session.as_str())
    }

    pub fn state_path(&self, session: &SessionName) -> PathBuf {
        self.session_dir(session).join(STATE_FILE)
    }

    pub fn poll_ledger_path(&self, session: &SessionName) -> PathBuf {
        self.session_dir(session).join(POLL_LEDGER_FILE)
    }

    pub fn capture_marker_path(&self, session: &SessionName) -> PathBuf {
        self.session_dir(session).join(CAPTURE_MARKER_FILE)
    }

    pub fn ensure_root(&self) -> Result<(), GateError> {
        ensure_secure_dir(&self.root)
    }

    pub fn ensure_session_dir(&self, session: &SessionName) -> Result<(), GateError> {
        ensure_secure_dir(&self.session_dir(session))
    }

    /// True when `candidate` is the root or lexically below it.
    pub fn contains(&self, candidate: &Path) -> bool {
        let abs = normalize_lexically(candidate);
        abs.starts_with(&self.root)
    }

    /// Replace `path` with `data` via a uniquely named sibling temp file and a
    /// rename, so a concurrent reader sees either the old or the new bytes.
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), GateError> {
        let target = normalize_lexically(path);
        if !self.contains(&target) || target == self.root {
            return Err(GateError::security(format!(
                "Refusing to write outside runtime dir: {}",
                target.display()
            )));
        }
        let dir = target
            .parent()
            .ok_or_else(|| GateError::security("Write target has no parent directory"))?;
        ensure_secure_dir(dir)?;

        let base = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.{}.{}.tmp", base, std::process::id(), Ulid::new()));

        let result = write_private_file(&tmp, data).and_then(|_| fs::rename(&tmp, &target));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(GateError::IoError(e));
        }
        Ok(())
    }

    pub fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), GateError> {
        let json = serde_json::to_string_pretty(record)?;
        self.write_atomic(path, json.as_bytes())
    }

    /// `Ok(None)` when the record does not exist; a record that cannot be
    /// read or parsed is `StateCorruption`.
    pub fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, GateError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GateError::StateCorruption {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| GateError::StateCorruption {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Read a record, deleting it if it is corrupt. Corrupt and missing
    /// records are both reported as `None`.
    pub fn load_or_heal<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        match self.read_record(path) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "discarding corrupt state record");
                if let Err(del) = self.delete_owned_file(path) {
                    warn!(error = %del, path = %path.display(), "could not remove corrupt record");
                }
                None
            }
        }
    }

    /// Remove a regular file we own inside the root. A missing file is fine;
    /// directories, symlinks and foreign-owned files are refused.
    pub fn delete_owned_file(&self, path: &Path) -> Result<(), GateError> {
        let target = normalize_lexically(path);
        if !self.contains(&target) {
            return Err(GateError::security(format!(
                "Refusing to delete path outside runtime dir: {}",
                target.display()
            )));
        }
        let meta = match fs::symlink_metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(GateError::IoError(e)),
        };
        if meta.is_dir() || meta.file_type().is_symlink() {
            return Err(GateError::security(format!(
                "Refusing to delete non-regular file: {}",
                target.display()
            )));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let uid = current_uid();
            if meta.uid() != uid {
                return Err(GateError::security(format!(
                    "Refusing to delete file not owned by current user: {}",
                    target.display()
                )));
            }
        }
        match fs::remove_file(&target) {
            Ok(()) => {
                debug!(path = %target.display(), "deleted state file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GateError::IoError(e)),
        }
    }
}

/// Create `dir` (mode 0700) if needed, then require a real directory owned by
/// the current user with no group/other bits. Loose bits are tightened once.
pub fn ensure_secure_dir(dir: &Path) -> Result<(), GateError> {
    if let Err(e) = create_private_dir_all(dir) {
        // Something already occupies the path; the checks below classify it.
        if fs::symlink_metadata(dir).is_err() {
            return Err(GateError::IoError(e));
        }
    }
    let meta = fs::symlink_metadata(dir)?;
    if !meta.is_dir() || meta.file_type().is_symlink() {
        return Err(GateError::security(format!(
            "Not a real directory: {}",
            dir.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        if meta.uid() != current_uid() {
            return Err(GateError::security(format!(
                "Not owned by current user: {}",
                dir.display()
            )));
        }
        if meta.mode() & 0o077 != 0 {
            warn!(dir = %dir.display(), mode = format!("{:o}", meta.mode() & 0o777), "tightening runtime dir permissions");
            tighten_to_private(dir, |d| {
                fs::set_permissions(d, fs::Permissions::from_mode(0o700))
            })?;
        }
    }
    Ok(())
}

/// Any failure to reach mode 0700 is a security violation, including the
/// chmod itself erroring.
#[cfg(unix)]
fn tighten_to_private(
    dir: &Path,
    chmod: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), GateError> {
    use std::os::unix::fs::MetadataExt;

    chmod(dir).map_err(|e| {
        GateError::security(format!("Cannot set mode 0700: {}: {}", dir.display(), e))
    })?;
    let meta = fs::symlink_metadata(dir)?;
    if meta.mode() & 0o077 != 0 {
        return Err(GateError::security(format!(
            "Cannot set mode 0700: {}",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn create_private_dir_all(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir_all(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(unix)]
pub fn current_uid() -> u32 {
    // SAFETY: getuid() is a standard POSIX call with no safety requirements.
    unsafe { libc::getuid() }
}

/// Resolve `.` and `..` without touching the filesystem; relative paths are
/// anchored at the current directory.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let anchored = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in anchored.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
