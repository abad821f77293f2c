//! MPV process detection, spawning and supervision.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("MPV IPC socket {path:?} did not appear within {waited:?}")]
  StartupTimeout { path: PathBuf, waited: Duration },
}

/// Socket path for one session: unique per process and per session.
pub fn ipc_path(session_id: &str) -> PathBuf {
  std::env::temp_dir().join(format!(
    "termtube-{}-{}.sock",
    std::process::id(),
    session_id
  ))
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv", "/snap/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Spawn an audio-only MPV with its IPC server on `socket`.
pub fn spawn_mpv(
  mpv_path: Option<&Path>,
  socket: &Path,
  extra_args: &[String],
) -> Result<Child, ProcessError> {
  let mpv_exe = mpv_path
    .map(Path::to_path_buf)
    .or_else(find_mpv)
    .ok_or(ProcessError::NotFound)?;

  log::info!("Spawning MPV: {:?} with IPC: {:?}", mpv_exe, socket);
  if !extra_args.is_empty() {
    log::info!("Extra MPV args: {:?}", extra_args);
  }

  let mut cmd = Command::new(&mpv_exe);
  cmd
    .arg("--idle=yes")
    .arg("--no-video")
    .arg("--keep-open=yes")
    .arg("--no-terminal")
    .arg(format!("--input-ipc-server={}", socket.display()));

  for arg in extra_args {
    cmd.arg(arg);
  }

  let child = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .kill_on_drop(true)
    .spawn()?;

  Ok(child)
}

/// Poll until `path` exists or `timeout` elapses.
pub async fn wait_for_socket(
  path: &Path,
  timeout: Duration,
  poll: Duration,
) -> Result<(), ProcessError> {
  let started = Instant::now();
  loop {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
      log::debug!("IPC socket appeared after {:?}", started.elapsed());
      return Ok(());
    }
    if started.elapsed() >= timeout {
      return Err(ProcessError::StartupTimeout {
        path: path.to_path_buf(),
        waited: timeout,
      });
    }
    tokio::time::sleep(poll).await;
  }
}

/// Remove a leftover socket file.
pub fn cleanup_ipc(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => log::debug!("Removed stale IPC socket {:?}", path),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => log::warn!("Could not remove IPC socket {:?}: {}", path, e),
  }
}

/// A running MPV child owned by a watcher task.
///
/// The task reaps the child when it exits on its own and then runs the
/// `on_exit` callback; [`MpvProcess::terminate`] kills it instead and skips
/// the callback.
pub struct MpvProcess {
  generation: u64,
  pid: Option<u32>,
  exited: Arc<AtomicBool>,
  kill: CancellationToken,
  handle: Option<JoinHandle<()>>,
}

impl MpvProcess {
  pub fn watch<F>(mut child: Child, generation: u64, on_exit: F) -> Self
  where
    F: FnOnce(Option<ExitStatus>) + Send + 'static,
  {
    let pid = child.id();
    let exited = Arc::new(AtomicBool::new(false));
    let kill = CancellationToken::new();

    let task_exited = exited.clone();
    let task_kill = kill.clone();
    let handle = tokio::spawn(async move {
      tokio::select! {
        status = child.wait() => {
          task_exited.store(true, Ordering::Release);
          let status = match status {
            Ok(status) => {
              log::warn!("MPV process (pid: {:?}) exited: {}", pid, status);
              Some(status)
            }
            Err(e) => {
              log::error!("wait() on MPV process failed: {}", e);
              None
            }
          };
          on_exit(status);
        }
        _ = task_kill.cancelled() => {
          log::info!("Killing MPV process (pid: {:?})", pid);
          if let Err(e) = child.kill().await {
            log::error!("kill() failed: {}", e);
          }
          task_exited.store(true, Ordering::Release);
        }
      }
    });

    Self {
      generation,
      pid,
      exited,
      kill,
      handle: Some(handle),
    }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn pid(&self) -> Option<u32> {
    self.pid
  }

  pub fn is_alive(&self) -> bool {
    !self.exited.load(Ordering::Acquire)
  }

  /// Kill the process and wait until it has been reaped.
  pub async fn terminate(mut self) {
    self.kill.cancel();
    if let Some(handle) = self.handle.take() {
      if let Err(e) = handle.await {
        log::error!("MPV watcher task failed during termination: {}", e);
      }
    }
  }
}

impl Drop for MpvProcess {
  fn drop(&mut self) {
    // Without a terminate() the watcher still kills the child in the background.
    self.kill.cancel();
  }
}
