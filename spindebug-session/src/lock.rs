use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use spindebug_core::config::state_dir_at;
use spindebug_core::WorkloadKey;

use crate::error::SessionError;

/// `<home>/.spindebug/run/`. Pure, no I/O.
pub fn run_dir_at(home: &Path) -> PathBuf {
    state_dir_at(home).join("run")
}

/// `<home>/.spindebug/run/<namespace>__<name>.lock`. Pure, no I/O.
pub fn lock_path_at(home: &Path, key: &WorkloadKey) -> PathBuf {
    run_dir_at(home).join(format!("{}__{}.lock", key.namespace, key.name))
}

/// Exclusive local claim on one workload, released on drop.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Claim `key`, reclaiming a lock whose recorded holder has exited.
    pub fn acquire_at(home: &Path, key: &WorkloadKey) -> Result<Self, SessionError> {
        let dir = run_dir_at(home);
        fs::create_dir_all(&dir).map_err(|source| SessionError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = lock_path_at(home, key);
        let mut holder = match Self::create(&path)? {
            Some(lock) => return Ok(lock.acquired(key)),
            None => read_holder(&path),
        };
        if let Some(pid) = holder.filter(|pid| !process_alive(*pid)) {
            tracing::warn!(
                workload = %key,
                pid,
                path = %path.display(),
                "reclaiming lock left by an exited session"
            );
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Io { path, source }),
            }
            match Self::create(&path)? {
                Some(lock) => return Ok(lock.acquired(key)),
                None => holder = read_holder(&path),
            }
        }

        Err(SessionError::SessionLocked {
            workload: key.clone(),
            path,
            pid: holder.map_or_else(|| "unknown".to_string(), |pid| pid.to_string()),
        })
    }

    /// `None` when the file already exists.
    fn create(path: &Path) -> Result<Option<Self>, SessionError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(source) => {
                return Err(SessionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        // Owned from here, so a failed write removes the file on drop.
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{}", std::process::id()).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(lock))
    }

    fn acquired(self, key: &WorkloadKey) -> Self {
        tracing::debug!(workload = %key, path = %self.path.display(), "acquired session lock");
        self
    }

    /// `acquire_at` under the user's home directory.
    pub fn acquire(key: &WorkloadKey) -> Result<Self, SessionError> {
        let home = dirs::home_dir().ok_or_else(|| SessionError::Io {
            path: PathBuf::from("~"),
            source: std::io::Error::new(ErrorKind::NotFound, "home directory not found"),
        })?;
        Self::acquire_at(&home, key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The PID recorded in a lock file, if it is readable.
fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
