use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use super::DaemonError;

/// Exclusive `flock` on the lock file, released when dropped.
/// The file holds the owning pid for diagnostics.
pub struct InstanceLock {
  _file: Flock<File>,
  path: PathBuf,
}

impl InstanceLock {
  pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
    // Open without truncating: another daemon may own it
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(path)
      .map_err(DaemonError::Lock)?;
    let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
      Ok(file) => file,
      Err((_, Errno::EWOULDBLOCK)) => {
        return Err(DaemonError::AlreadyRunning {
          lock: path.to_path_buf(),
        });
      }
      Err((_, errno)) => return Err(DaemonError::Lock(io::Error::from(errno))),
    };
    file.set_len(0).map_err(DaemonError::Lock)?;
    writeln!(file, "{}", std::process::id()).map_err(DaemonError::Lock)?;
    debug!(event = "daemon_lock_acquired", path = %path.display());
    Ok(Self {
      _file: file,
      path: path.to_path_buf(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}
