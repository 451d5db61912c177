//! PID file guard: one sibling of each CP's control socket, used to
//! reject a second supervisor instance for the same charge point and to
//! detect a stale socket left behind by a process that died uncleanly.

use std::fs;
use std::path::{Path, PathBuf};

use crate::support::errors::FatalError;

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path`: if it names a still-live process, fail; otherwise
    /// remove whatever stale file is there and write our own pid.
    pub fn claim(path: impl Into<PathBuf>) -> Result<Self, FatalError> {
        let path = path.into();
        if let Some(pid) = read_pid(&path) {
            if process_is_alive(pid) {
                return Err(FatalError::AlreadyRunning(pid));
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Liveness probe via `/proc/<pid>`; accurate on Linux, which is the
/// only platform the socket/pidfile control channel targets.
fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn claim_writes_our_own_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.pid");
        let guard = PidFile::claim(&path).unwrap();
        let recorded: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn claim_over_a_dead_pid_succeeds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.pid");
        fs::write(&path, "999999999").unwrap();
        assert!(PidFile::claim(&path).is_ok());
    }
}
