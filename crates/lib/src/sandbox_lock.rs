//! Exclusive lock on a cook sandbox.
//!
//! Two coordinators writing the same sandbox would corrupt each other's ledger, so a
//! coordinator holds `<sandbox>/.lock` for its whole run. Child workers of a
//! distributed cook share their parent's sandbox and never take the lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::CookMode;

const LOCK_FILENAME: &str = ".lock";

/// Who holds a sandbox. Written into the lock file so a refused cooker can say
/// which run is in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub mode: String,
  /// Platform list as given on the command line, empty for every configured one.
  pub platforms: String,
  pub started_at_unix: u64,
}

impl LockHolder {
  pub fn current(mode: CookMode, platforms: Option<&str>) -> Self {
    let mode = match mode {
      CookMode::ByTheBook => "by-the-book",
      CookMode::OnTheFly => "on-the-fly",
    };
    Self {
      pid: std::process::id(),
      mode: mode.to_string(),
      platforms: platforms.unwrap_or_default().to_string(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    }
  }

  /// How long ago the holder started, as of `now`.
  pub fn age(&self, now: SystemTime) -> Duration {
    let started = UNIX_EPOCH + Duration::from_secs(self.started_at_unix);
    now.duration_since(started).unwrap_or_default()
  }

  fn describe(&self) -> String {
    let platforms = if self.platforms.is_empty() {
      "all platforms"
    } else {
      self.platforms.as_str()
    };
    format!(
      "cook {} of {platforms} (PID {}, running for {}s)",
      self.mode,
      self.pid,
      self.age(SystemTime::now()).as_secs()
    )
  }
}

#[derive(Debug, Error)]
pub enum SandboxLockError {
  #[error("sandbox {sandbox} is in use by {holder}\nremove {lock_path} if that process is gone")]
  Held {
    sandbox: PathBuf,
    holder: String,
    lock_path: PathBuf,
  },

  #[error("sandbox {sandbox} is in use by another cooker\nremove {lock_path} if no cooker is running")]
  HeldByUnknown { sandbox: PathBuf, lock_path: PathBuf },

  #[error("failed to prepare lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record lock holder in {path}: {source}")]
  Record {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held for as long as the value lives; the OS drops the lock with the handle.
pub struct SandboxLock {
  file: File,
  lock_path: PathBuf,
}

impl SandboxLock {
  pub fn acquire(sandbox: &Path, holder: &LockHolder) -> Result<Self, SandboxLockError> {
    let lock_path = sandbox.join(LOCK_FILENAME);
    let open_error = |source| SandboxLockError::Open {
      path: lock_path.clone(),
      source,
    };

    std::fs::create_dir_all(sandbox).map_err(open_error)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(open_error)?;

    match try_lock_exclusive(&file) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(refused(sandbox, &lock_path)),
      Err(source) => {
        return Err(SandboxLockError::Lock {
          path: lock_path,
          source,
        });
      }
    }

    let mut lock = SandboxLock { file, lock_path };
    lock.record(holder)?;
    debug!(lock = %lock.lock_path.display(), mode = %holder.mode, "sandbox locked");
    Ok(lock)
  }

  fn record(&mut self, holder: &LockHolder) -> Result<(), SandboxLockError> {
    let path = self.lock_path.clone();
    let record_error = |source| SandboxLockError::Record { path, source };
    let body = serde_json::to_vec_pretty(holder).map_err(io::Error::other);
    body
      .and_then(|body| {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&body)?;
        self.file.flush()
      })
      .map_err(record_error)
  }

  /// Holder as recorded by this process. Read through the held handle, since a
  /// second open fails on Windows while the lock is held.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    read_holder(file)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn read_holder(mut reader: impl Read) -> io::Result<LockHolder> {
  let mut contents = String::new();
  reader.read_to_string(&mut contents)?;
  serde_json::from_str(&contents).map_err(io::Error::other)
}

fn refused(sandbox: &Path, lock_path: &Path) -> SandboxLockError {
  match File::open(lock_path).and_then(read_holder) {
    Ok(holder) => SandboxLockError::Held {
      sandbox: sandbox.to_path_buf(),
      holder: holder.describe(),
      lock_path: lock_path.to_path_buf(),
    },
    Err(e) => {
      warn!(lock = %lock_path.display(), error = %e, "unreadable sandbox lock holder");
      SandboxLockError::HeldByUnknown {
        sandbox: sandbox.to_path_buf(),
        lock_path: lock_path.to_path_buf(),
      }
    }
  }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: a zeroed OVERLAPPED is valid and `handle` stays open for the call.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if locked != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn batch() -> LockHolder {
    LockHolder::current(CookMode::ByTheBook, Some("Win64+Switch"))
  }

  #[test]
  fn acquire_creates_sandbox_and_records_holder() {
    let temp = TempDir::new().unwrap();
    let sandbox = temp.path().join("Saved").join("Cooked");
    let lock = SandboxLock::acquire(&sandbox, &batch()).unwrap();

    assert!(lock.lock_path().exists());
    let holder = lock.holder().unwrap();
    assert_eq!(holder.mode, "by-the-book");
    assert_eq!(holder.platforms, "Win64+Switch");
    assert_eq!(holder.pid, std::process::id());
  }

  #[test]
  fn second_cooker_is_told_who_holds_the_sandbox() {
    let temp = TempDir::new().unwrap();
    let _held = SandboxLock::acquire(temp.path(), &batch()).unwrap();

    let refused = SandboxLock::acquire(temp.path(), &LockHolder::current(CookMode::OnTheFly, None));
    match refused {
      Err(SandboxLockError::Held { holder, .. }) => {
        assert!(holder.contains("by-the-book"), "{holder}");
        assert!(holder.contains("Win64+Switch"), "{holder}");
      }
      Err(SandboxLockError::HeldByUnknown { .. }) => {}
      other => panic!("expected the sandbox to be held, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    drop(SandboxLock::acquire(temp.path(), &batch()).unwrap());
    let again = SandboxLock::acquire(temp.path(), &LockHolder::current(CookMode::OnTheFly, None)).unwrap();
    assert_eq!(again.holder().unwrap().mode, "on-the-fly");
  }

  #[test]
  fn holder_without_platforms_describes_all() {
    let holder = LockHolder {
      pid: 42,
      mode: "on-the-fly".to_string(),
      platforms: String::new(),
      started_at_unix: 0,
    };
    assert!(holder.describe().starts_with("cook on-the-fly of all platforms (PID 42"));
    assert_eq!(holder.age(UNIX_EPOCH + Duration::from_secs(90)), Duration::from_secs(90));
  }
}
