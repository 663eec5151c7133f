//! Single-instance PID file.
//!
//! The file holds the daemon's PID followed by a newline. A file naming a
//! dead process is treated as stale and replaced.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// PID file held for the lifetime of the daemon; removed on drop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current PID to `path`, failing if another live daemon owns it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        if let Ok(content) = std::fs::read_to_string(&path) {
            match content.trim().parse::<i32>() {
                Ok(pid) if process_exists(pid) => {
                    bail!("daemon already running (PID {})", pid);
                }
                Ok(pid) => {
                    tracing::info!("Removing stale PID file (PID {} no longer exists)", pid);
                }
                Err(_) => {
                    tracing::info!("Removing unreadable PID file: {}", path.display());
                }
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale PID file: {}", path.display()))?;
        }

        std::fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write PID file: {}", path.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Whether a process with `pid` exists (signal 0 probe)
fn process_exists(pid: i32) -> bool {
    // 0 and negative values address process groups, not a process
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokentrack.pid");

        let pid_file = PidFile::acquire(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", std::process::id()));
        assert_eq!(pid_file.path(), path.as_path());

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_live_pid_blocks_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokentrack.pid");

        let _held = PidFile::acquire(&path).unwrap();
        let err = PidFile::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokentrack.pid");
        // Above the kernel's pid_max, so no such process
        std::fs::write(&path, "999999999\n").unwrap();

        let _pid_file = PidFile::acquire(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_garbage_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokentrack.pid");
        std::fs::write(&path, "not a pid").unwrap();

        assert!(PidFile::acquire(&path).is_ok());
    }

    #[test]
    fn test_process_exists() {
        assert!(process_exists(std::process::id() as i32));
        assert!(!process_exists(0));
        assert!(!process_exists(-1));
    }
}
