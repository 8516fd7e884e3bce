use std::io;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

/// Spawn an agent process with piped stdout/stderr and no stdin.
/// The child leads its own process group so signals also reach anything it forks.
pub fn spawn_agent(program: &str, args: &[String], env: &[(String, String)]) -> io::Result<Child> {
  let mut cmd = Command::new(program);
  cmd
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(false);
  // Extend environment without clearing the existing one
  for (key, value) in env {
    cmd.env(key, value);
  }
  let child = cmd.spawn()?;
  debug!(
    event = "process_spawned",
    program,
    args_len = args.len(),
    env_len = env.len(),
    pid = ?child.id()
  );
  Ok(child)
}

/// Ask a process group to terminate (SIGTERM). Advisory: the process may ignore it.
pub fn terminate(pid: u32) -> io::Result<()> {
  send(pid, Signal::SIGTERM)
}

/// Kill a process group unconditionally (SIGKILL).
pub fn force_kill(pid: u32) -> io::Result<()> {
  send(pid, Signal::SIGKILL)
}

fn send(pid: u32, signal: Signal) -> io::Result<()> {
  let raw = i32::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
  // Negative pid addresses the whole group led by `pid`
  kill(Pid::from_raw(-raw), signal).map_err(io::Error::from)
}

/// Signal that terminated the process, if it did not exit normally.
pub fn termination_signal(status: &ExitStatus) -> Option<i32> {
  use std::os::unix::process::ExitStatusExt;
  status.signal()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn spawn_and_terminate() {
    let mut child = spawn_agent("sh", &["-c".into(), "sleep 5".into()], &[]).unwrap();
    let pid = child.id().expect("pid");
    terminate(pid).unwrap();
    let status = child.wait().await.unwrap();
    assert!(!status.success());
    assert_eq!(termination_signal(&status), Some(15));
  }

  #[tokio::test]
  async fn env_is_passed_through() {
    let child = spawn_agent(
      "sh",
      &["-c".into(), "printf %s \"$GREETING\"".into()],
      &[("GREETING".into(), "hello".into())],
    )
    .unwrap();
    let out = child.wait_with_output().await.unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hello");
  }
}
