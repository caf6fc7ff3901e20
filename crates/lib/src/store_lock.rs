//! Run lock on the cache directory.
//!
//! Every run, `plan` included, holds an exclusive `flock` on
//! `<cache_dir>/.lock` until the process exits or the [`StoreLock`] is
//! dropped. The holder writes who it is into the file so that a second run
//! can say what it is waiting on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rustix::fs::{FlockOperation, flock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::users::current_user;

const LOCK_FILENAME: &str = ".lock";

/// The process holding the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub user: String,
  pub command: String,
  pub since_unix: u64,
}

impl LockHolder {
  fn me(command: &str) -> Self {
    Self {
      pid: std::process::id(),
      user: current_user(),
      command: command.to_string(),
      since_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
    }
  }

  fn read(mut file: &File) -> Option<Self> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
  }
}

fn describe(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(h) => format!(
      "'{}' (pid {}, user {}, since unix time {})",
      h.command, h.pid, h.user, h.since_unix
    ),
    None => "another koti process".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "{} is already using {}\nif no koti process is running, remove the lock file",
    describe(.holder),
    .path.display()
  )]
  Busy { path: PathBuf, holder: Option<LockHolder> },

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: io::Error,
  },
}

impl StoreLockError {
  fn io(context: impl Into<String>, source: io::Error) -> Self {
    StoreLockError::Io {
      context: context.into(),
      source,
    }
  }
}

/// Held for the duration of a run.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  path: PathBuf,
}

impl StoreLock {
  /// Take the lock without waiting, recording `command` as the holder.
  pub fn acquire(cache_dir: &Path, command: &str) -> Result<Self, StoreLockError> {
    fs::create_dir_all(cache_dir)
      .map_err(|e| StoreLockError::io(format!("failed to create {}", cache_dir.display()), e))?;

    let path = cache_dir.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(|e| StoreLockError::io(format!("failed to open {}", path.display()), e))?;

    if let Err(errno) = flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive) {
      let err = io::Error::from(errno);
      if err.kind() == io::ErrorKind::WouldBlock {
        let holder = LockHolder::read(&file);
        return Err(StoreLockError::Busy { path, holder });
      }
      return Err(StoreLockError::io(format!("failed to lock {}", path.display()), err));
    }

    let lock = StoreLock { file, path };
    lock.write_holder(&LockHolder::me(command))?;
    debug!(path = %lock.path.display(), command, "run lock taken");
    Ok(lock)
  }

  fn write_holder(&self, holder: &LockHolder) -> Result<(), StoreLockError> {
    let context = || format!("failed to write {}", self.path.display());
    let json = serde_json::to_vec(holder).map_err(|e| StoreLockError::io(context(), io::Error::other(e)))?;
    let mut file = &self.file;
    file.set_len(0).map_err(|e| StoreLockError::io(context(), e))?;
    file.seek(SeekFrom::Start(0)).map_err(|e| StoreLockError::io(context(), e))?;
    file.write_all(&json).map_err(|e| StoreLockError::io(context(), e))?;
    Ok(())
  }

  pub fn holder(&self) -> Option<LockHolder> {
    LockHolder::read(&self.file)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for StoreLock {
  fn drop(&mut self) {
    // The flock goes away with the file; a stale holder must not outlive it.
    let _ = self.file.set_len(0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn second_run_sees_the_holder() {
    let temp = TempDir::new().unwrap();
    let _apply = StoreLock::acquire(temp.path(), "apply").unwrap();

    match StoreLock::acquire(temp.path(), "plan") {
      Err(StoreLockError::Busy { holder: Some(holder), .. }) => {
        assert_eq!(holder.command, "apply");
        assert_eq!(holder.pid, std::process::id());
      }
      other => panic!("expected a busy lock, got {:?}", other.map(|l| l.path().to_path_buf())),
    }
  }

  #[test]
  fn holder_is_recorded() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("var").join("cache");
    let lock = StoreLock::acquire(&dir, "apply").unwrap();
    let holder = lock.holder().unwrap();
    assert_eq!(holder.command, "apply");
    assert_eq!(holder.user, current_user());
    assert!(lock.path().starts_with(&dir));
  }

  #[test]
  fn dropping_releases() {
    let temp = TempDir::new().unwrap();
    drop(StoreLock::acquire(temp.path(), "apply").unwrap());
    let lock = StoreLock::acquire(temp.path(), "plan").unwrap();
    assert_eq!(lock.holder().map(|h| h.command), Some("plan".to_string()));
  }

  #[test]
  fn busy_message_names_the_holder() {
    let err = StoreLockError::Busy {
      path: PathBuf::from("/var/cache/koti/.lock"),
      holder: Some(LockHolder {
        pid: 42,
        user: "root".to_string(),
        command: "apply".to_string(),
        since_unix: 1,
      }),
    };
    let message = err.to_string();
    assert!(message.starts_with("'apply' (pid 42, user root, since unix time 1) is already using /var/cache/koti/.lock"));
  }
}
