//! Lock file management for daemon exclusivity
//!
//! At most one daemon instance per configured lock path. The lock is an
//! flock-held file carrying the holder's pid; a lock left behind by a
//! dead process is detected and reclaimed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive daemon lock, released on drop
pub struct DaemonLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: u64,
}

impl DaemonLock {
    /// Acquire the lock at `path`
    ///
    /// Fails if another live process holds it; a stale lock (holder no
    /// longer running) is removed and re-acquired.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory for '{}'", path.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file '{}'", path.display()))?;

        if !try_flock_exclusive(&file)? {
            if Self::is_stale(&mut file)? {
                tracing::warn!("removing stale daemon lock '{}'", path.display());
                drop(file);
                std::fs::remove_file(&path)?;
                return Self::acquire(path);
            }
            anyhow::bail!(
                "daemon already running (lock '{}' held by a live process)",
                path.display()
            );
        }

        Self::write_content(&mut file)?;
        Ok(Self { path, file })
    }

    /// Release the lock and remove its file
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).context("failed to remove lock file")?;
        Ok(())
    }

    fn is_stale(file: &mut File) -> Result<bool> {
        match Self::read_content(file) {
            Ok(content) => Ok(!is_process_alive(content.pid)),
            // Unreadable content means an interrupted writer; treat as stale
            Err(_) => Ok(true),
        }
    }

    fn write_content(file: &mut File) -> Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: current_timestamp_ms(),
        };
        let serialized = serde_json::to_string(&content)?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_content(file: &mut File) -> Result<LockContent> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
