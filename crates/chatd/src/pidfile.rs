//! PID file and state-directory paths for the daemon.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use thiserror::Error;
use tracing::debug;

const STATE_DIR_NAME: &str = "chatd";
const PID_FILE_NAME: &str = "chatd.pid";
const LOG_FILE_NAME: &str = "chatd.log";

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("Failed to create state directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write PID file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Directory holding the PID and log files.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(STATE_DIR_NAME)
}

pub fn log_file_path() -> PathBuf {
    state_dir().join(LOG_FILE_NAME)
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// PID file under [`state_dir`].
    pub fn default_location() -> Self {
        Self::new(state_dir().join(PID_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the file, if any.
    pub fn read(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse().ok()
    }

    /// Records the current process id.
    pub fn write_current(&self) -> Result<(), PidFileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PidFileError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, process::id().to_string()).map_err(|source| PidFileError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %e, "Failed to remove PID file");
            }
        }
    }

    /// PID of a live daemon. A file naming a dead process is removed.
    pub fn running_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            return Some(pid);
        }
        debug!(pid, "Removing stale PID file");
        self.remove();
        None
    }
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 performs the permission and existence checks only
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("nested").join("chatd.pid"));

        assert!(pid_file.read().is_none());
        pid_file.write_current().unwrap();
        assert_eq!(pid_file.read(), Some(process::id()));
        assert_eq!(pid_file.running_pid(), Some(process::id()));

        pid_file.remove();
        assert!(!pid_file.path().exists());
        // Removing twice is fine
        pid_file.remove();
    }

    #[test]
    fn test_garbage_contents_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatd.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert!(PidFile::new(&path).read().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_pid_file_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatd.pid");
        // Above the Linux pid_max ceiling, so never a live process
        fs::write(&path, "4194305").unwrap();

        let pid_file = PidFile::new(&path);
        assert!(pid_file.running_pid().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_state_paths_share_directory() {
        assert_eq!(log_file_path().parent(), Some(state_dir().as_path()));
        assert!(PidFile::default_location().path().starts_with(state_dir()));
    }
}
