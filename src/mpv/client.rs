//! MPV session: owns the process, the IPC connection and the subscriber list.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Child;

use super::events::{EventBus, EventFilter, EventHandler, Subscription};
use super::ipc::{ConnectOptions, IpcError, MpvIpc};
use super::process::{cleanup_ipc, ipc_path, spawn_mpv, wait_for_socket, MpvProcess, ProcessError};
use super::protocol::{MpvCommand, MpvResponse, SeekMode};

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
  #[error("Not connected")]
  NotConnected,
}

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
  NotStarted,
  Spawning,
  WaitingSocket,
  Connecting,
  Connected,
  Disconnected,
}

/// How the session spawns and reaches mpv.
#[derive(Debug, Clone)]
pub struct SessionOptions {
  /// Custom MPV executable (None = auto-detect).
  pub mpv_path: Option<PathBuf>,
  /// Additional MPV command-line arguments.
  pub extra_args: Vec<String>,
  /// Socket location override (None = per-session temp path).
  pub socket_path: Option<PathBuf>,
  pub startup_timeout: Duration,
  pub socket_poll: Duration,
  pub connect: ConnectOptions,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      mpv_path: None,
      extra_args: Vec::new(),
      socket_path: None,
      startup_timeout: Duration::from_secs(5),
      socket_poll: Duration::from_millis(100),
      connect: ConnectOptions::default(),
    }
  }
}

struct Session {
  id: String,
  socket_path: PathBuf,
  options: SessionOptions,
  process: Mutex<Option<MpvProcess>>,
  ipc: Mutex<Option<Arc<MpvIpc>>>,
  status: Mutex<SessionStatus>,
  connect_lock: tokio::sync::Mutex<()>,
  request_ids: Arc<AtomicU64>,
  generations: AtomicU64,
  bus: EventBus,
  observed: Mutex<Vec<String>>,
}

impl Session {
  fn set_status(&self, status: SessionStatus) {
    let mut current = self.status.lock();
    if *current != status {
      log::debug!("MPV session {}: {:?} -> {:?}", self.id, *current, status);
      *current = status;
    }
  }

  /// Called by the watcher task when a spawned process exits on its own.
  fn on_process_exit(&self, generation: u64, status: Option<ExitStatus>) {
    let process = {
      let mut process = self.process.lock();
      if process.as_ref().map(MpvProcess::generation) != Some(generation) {
        return;
      }
      process.take()
    };
    drop(process);

    if let Some(ipc) = self.ipc.lock().take() {
      ipc.close();
    }
    log::warn!(
      "MPV exited unexpectedly ({:?}); next start will spawn a new process",
      status
    );
    self.set_status(SessionStatus::Disconnected);
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    if let Some(ipc) = self.ipc.get_mut().take() {
      ipc.close();
    }
    // Dropping the handle makes the watcher kill the child.
    self.process.get_mut().take();
    cleanup_ipc(&self.socket_path);
  }
}

/// Handle to one MPV session. Clones share the same process and connection.
#[derive(Clone)]
pub struct MpvClient {
  inner: Arc<Session>,
}

impl MpvClient {
  /// Create a session. Nothing is spawned until [`MpvClient::start`].
  pub fn new(options: SessionOptions) -> Self {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let socket_path = options
      .socket_path
      .clone()
      .unwrap_or_else(|| ipc_path(&id[..8]));

    Self {
      inner: Arc::new(Session {
        id,
        socket_path,
        options,
        process: Mutex::new(None),
        ipc: Mutex::new(None),
        status: Mutex::new(SessionStatus::NotStarted),
        connect_lock: tokio::sync::Mutex::new(()),
        request_ids: Arc::new(AtomicU64::new(1)),
        generations: AtomicU64::new(0),
        bus: EventBus::new(),
        observed: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn socket_path(&self) -> &Path {
    &self.inner.socket_path
  }

  pub fn status(&self) -> SessionStatus {
    *self.inner.status.lock()
  }

  /// Check if connected.
  pub fn is_connected(&self) -> bool {
    self
      .inner
      .ipc
      .lock()
      .as_ref()
      .map(|ipc| ipc.is_open())
      .unwrap_or(false)
  }

  pub fn is_process_alive(&self) -> bool {
    self
      .inner
      .process
      .lock()
      .as_ref()
      .map(MpvProcess::is_alive)
      .unwrap_or(false)
  }

  /// Make sure a connected mpv exists.
  ///
  /// No-op when already connected; reconnects only when the process is
  /// alive but the socket is gone; otherwise spawns a fresh process.
  pub async fn start(&self) -> Result<(), MpvError> {
    let _guard = self.inner.connect_lock.lock().await;

    let alive = self.is_process_alive();
    if alive && self.is_connected() {
      return Ok(());
    }

    if alive {
      log::info!("MPV running but IPC is down, reconnecting");
      return self.connect().await;
    }

    self.spawn_fresh().await?;
    self.connect().await
  }

  async fn spawn_fresh(&self) -> Result<(), MpvError> {
    self.inner.set_status(SessionStatus::Spawning);
    if let Some(ipc) = self.inner.ipc.lock().take() {
      ipc.close();
    }
    cleanup_ipc(&self.inner.socket_path);

    let options = &self.inner.options;
    let child = match spawn_mpv(
      options.mpv_path.as_deref(),
      &self.inner.socket_path,
      &options.extra_args,
    ) {
      Ok(child) => child,
      Err(e) => {
        log::error!("Failed to spawn MPV: {}", e);
        self.inner.set_status(SessionStatus::Disconnected);
        return Err(e.into());
      }
    };
    self.register_process(child);

    self.inner.set_status(SessionStatus::WaitingSocket);
    if let Err(e) = wait_for_socket(
      &self.inner.socket_path,
      options.startup_timeout,
      options.socket_poll,
    )
    .await
    {
      log::error!("{}", e);
      let process = self.inner.process.lock().take();
      if let Some(process) = process {
        process.terminate().await;
      }
      self.inner.set_status(SessionStatus::Disconnected);
      return Err(e.into());
    }

    Ok(())
  }

  /// Hand a child to a watcher that invalidates this session when it exits.
  fn register_process(&self, child: Child) {
    let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
    let session = Arc::downgrade(&self.inner);
    let process = MpvProcess::watch(child, generation, move |status| {
      if let Some(session) = session.upgrade() {
        session.on_process_exit(generation, status);
      }
    });
    log::info!(
      "MPV process started (pid: {:?}, generation {})",
      process.pid(),
      generation
    );

    let previous = self.inner.process.lock().replace(process);
    drop(previous);
  }

  async fn connect(&self) -> Result<(), MpvError> {
    self.inner.set_status(SessionStatus::Connecting);

    let ipc = match MpvIpc::connect(
      &self.inner.socket_path,
      &self.inner.options.connect,
      self.inner.request_ids.clone(),
      self.inner.bus.clone(),
    )
    .await
    {
      Ok(ipc) => ipc,
      Err(e) => {
        log::error!("Failed to connect to MPV: {}", e);
        self.inner.set_status(SessionStatus::Disconnected);
        return Err(e.into());
      }
    };

    let previous = self.inner.ipc.lock().replace(Arc::new(ipc));
    if let Some(previous) = previous {
      previous.close();
    }
    self.inner.set_status(SessionStatus::Connected);
    log::info!("MPV client connected");

    self.replay_observations().await;
    Ok(())
  }

  /// mpv forgets observations when it restarts, so reissue all of them.
  async fn replay_observations(&self) {
    let observed = self.inner.observed.lock().clone();
    for (index, name) in observed.iter().enumerate() {
      let id = index as u64 + 1;
      if let Err(e) = self.send(MpvCommand::observe_property(id, name)).await {
        log::warn!("Failed to observe {}: {}", name, e);
      }
    }
  }

  /// Get a clone of the IPC connection.
  fn get_ipc(&self) -> Result<Arc<MpvIpc>, MpvError> {
    let guard = self.inner.ipc.lock();
    match guard.as_ref() {
      Some(ipc) if ipc.is_open() => Ok(ipc.clone()),
      _ => Err(MpvError::NotConnected),
    }
  }

  /// Send a command to MPV.
  async fn send(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    let ipc = self.get_ipc()?;
    let response = ipc.send_command(&cmd).await?;

    if !response.is_success() {
      return Err(MpvError::CommandFailed(response.error));
    }

    Ok(response)
  }

  /// Send any command and return its `data` (or `Null`).
  pub async fn command(&self, cmd: MpvCommand) -> Result<Value, MpvError> {
    let response = self.send(cmd).await?;
    Ok(response.data.unwrap_or(Value::Null))
  }

  /// Load a URI, replacing the current file.
  pub async fn loadfile(&self, uri: &str) -> Result<(), MpvError> {
    log::info!("Loading file: {}", uri);
    self.send(MpvCommand::loadfile(uri)).await?;
    Ok(())
  }

  /// Set pause state.
  pub async fn set_pause(&self, paused: bool) -> Result<(), MpvError> {
    self.send(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }

  pub async fn cycle_pause(&self) -> Result<(), MpvError> {
    self.send(MpvCommand::cycle("pause")).await?;
    Ok(())
  }

  pub async fn seek(&self, offset: f64, mode: SeekMode) -> Result<(), MpvError> {
    self.send(MpvCommand::seek(offset, mode)).await?;
    Ok(())
  }

  /// Stop playback; mpv stays running and idle.
  pub async fn stop(&self) -> Result<(), MpvError> {
    self.send(MpvCommand::stop()).await?;
    Ok(())
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<Value, MpvError> {
    self.command(MpvCommand::get_property(name)).await
  }

  /// Observe a property for changes.
  ///
  /// The property is remembered and observed again after every reconnect.
  /// While disconnected it is only recorded.
  pub async fn observe(&self, name: &str) -> Result<(), MpvError> {
    let id = {
      let mut observed = self.inner.observed.lock();
      match observed.iter().position(|p| p == name) {
        Some(index) => index + 1,
        None => {
          observed.push(name.to_string());
          observed.len()
        }
      }
    } as u64;

    if !self.is_connected() {
      log::debug!("Observation of {} deferred until connected", name);
      return Ok(());
    }
    self.send(MpvCommand::observe_property(id, name)).await?;
    Ok(())
  }

  /// Receive inbound messages matching `filter`.
  pub fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
    self.inner.bus.subscribe(filter, handler)
  }

  /// Quit MPV gracefully, then make sure it is gone.
  pub async fn quit(&self) {
    let active = self.inner.process.lock().is_some() || self.inner.ipc.lock().is_some();
    if !active {
      log::debug!("quit() with no active MPV session");
      return;
    }

    if let Err(e) = self.send(MpvCommand::quit()).await {
      log::warn!("Failed to quit MPV gracefully: {}, forcing stop", e);
    }
    self.terminate().await;
  }

  /// Close IPC, kill the process and remove the socket.
  pub async fn terminate(&self) {
    let _guard = self.inner.connect_lock.lock().await;

    if let Some(ipc) = self.inner.ipc.lock().take() {
      log::info!("Closing IPC connection");
      ipc.close();
    }

    let process = self.inner.process.lock().take();
    if let Some(process) = process {
      log::info!("Terminating MPV process (pid: {:?})", process.pid());
      process.terminate().await;
    }

    cleanup_ipc(&self.inner.socket_path);
    self.inner.set_status(SessionStatus::Disconnected);
    log::info!("MPV client stopped");
  }

  #[cfg(test)]
  fn adopt(&self, child: Child, ipc: MpvIpc) {
    self.register_process(child);
    *self.inner.ipc.lock() = Some(Arc::new(ipc));
    self.inner.set_status(SessionStatus::Connected);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
  use tokio::net::UnixListener;
  use tokio::process::Command;

  /// Minimal stand-in for mpv's IPC server.
  struct FakeMpv {
    accepts: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<Vec<Value>>>>,
  }

  impl FakeMpv {
    fn serve(path: &Path) -> Self {
      let listener = UnixListener::bind(path).unwrap();
      let accepts = Arc::new(AtomicUsize::new(0));
      let commands = Arc::new(Mutex::new(Vec::new()));
      let a = accepts.clone();
      let c = commands.clone();
      tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
          a.fetch_add(1, Ordering::SeqCst);
          let c = c.clone();
          tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(stream);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
              let value: Value = serde_json::from_str(&line).unwrap();
              let command = value["command"].as_array().unwrap().clone();
              let error = if command[0] == "get_property" && command[1] == "missing" {
                "property not found"
              } else {
                "success"
              };
              c.lock().push(command);
              let reply = format!(
                "{{\"request_id\":{},\"error\":\"{}\",\"data\":null}}\n",
                value["request_id"], error
              );
              if write.write_all(reply.as_bytes()).await.is_err() {
                break;
              }
            }
          });
        }
      });
      Self { accepts, commands }
    }

    fn accepts(&self) -> usize {
      self.accepts.load(Ordering::SeqCst)
    }

    fn verbs(&self) -> Vec<String> {
      self
        .commands
        .lock()
        .iter()
        .map(|c| c[0].as_str().unwrap_or_default().to_string())
        .collect()
    }
  }

  fn options(dir: &Path) -> SessionOptions {
    SessionOptions {
      mpv_path: Some(PathBuf::from("/nonexistent/termtube-mpv")),
      socket_path: Some(dir.join("mpv.sock")),
      startup_timeout: Duration::from_millis(200),
      socket_poll: Duration::from_millis(10),
      connect: ConnectOptions {
        attempts: 2,
        retry_delay: Duration::from_millis(10),
        command_timeout: Duration::from_secs(2),
      },
      ..Default::default()
    }
  }

  async fn connected_client(dir: &Path) -> (MpvClient, FakeMpv) {
    let opts = options(dir);
    let fake = FakeMpv::serve(opts.socket_path.as_ref().unwrap());
    let client = MpvClient::new(opts);
    let ipc = MpvIpc::connect(
      client.socket_path(),
      &client.inner.options.connect,
      client.inner.request_ids.clone(),
      client.inner.bus.clone(),
    )
    .await
    .unwrap();
    let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
    client.adopt(child, ipc);
    (client, fake)
  }

  async fn wait_for_accepts(fake: &FakeMpv, expected: usize) {
    for _ in 0..200 {
      if fake.accepts() >= expected {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(fake.accepts(), expected);
  }

  #[tokio::test]
  async fn test_start_when_connected_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (client, fake) = connected_client(dir.path()).await;
    wait_for_accepts(&fake, 1).await;

    // A spawn would fail: mpv_path does not exist.
    client.start().await.unwrap();
    client.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fake.accepts(), 1);
    assert_eq!(client.status(), SessionStatus::Connected);
    client.terminate().await;
  }

  #[tokio::test]
  async fn test_start_reconnects_when_only_socket_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let (client, fake) = connected_client(dir.path()).await;
    wait_for_accepts(&fake, 1).await;
    client.get_ipc().unwrap().close();
    assert!(!client.is_connected());
    assert!(client.is_process_alive());

    client.start().await.unwrap();

    wait_for_accepts(&fake, 2).await;
    assert!(client.is_connected());
    client.terminate().await;
  }

  #[tokio::test]
  async fn test_observations_are_replayed_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (client, fake) = connected_client(dir.path()).await;
    client.observe("time-pos").await.unwrap();
    client.observe("pause").await.unwrap();
    client.observe("time-pos").await.unwrap();

    client.get_ipc().unwrap().close();
    client.start().await.unwrap();

    let commands = fake.commands.lock().clone();
    let observes: Vec<(u64, String)> = commands
      .iter()
      .filter(|c| c[0] == "observe_property")
      .map(|c| (c[1].as_u64().unwrap(), c[2].as_str().unwrap().to_string()))
      .collect();
    assert_eq!(
      observes,
      vec![
        (1, "time-pos".to_string()),
        (2, "pause".to_string()),
        (1, "time-pos".to_string()),
        (1, "time-pos".to_string()),
        (2, "pause".to_string()),
      ]
    );
    client.terminate().await;
  }

  #[tokio::test]
  async fn test_startup_timeout_kills_the_child() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    // Accepts mpv's flags but never opens the socket.
    let stand_in = dir.path().join("mpv");
    std::fs::write(&stand_in, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&stand_in, std::fs::Permissions::from_mode(0o755)).unwrap();

    let client = MpvClient::new(SessionOptions {
      mpv_path: Some(stand_in),
      ..options(dir.path())
    });
    let err = client.start().await.unwrap_err();

    assert!(matches!(
      err,
      MpvError::Process(ProcessError::StartupTimeout { .. })
    ));
    assert_eq!(client.status(), SessionStatus::Disconnected);
    assert!(!client.is_process_alive());
    assert!(!client.is_connected());
  }

  #[tokio::test]
  async fn test_unsolicited_exit_invalidates_session() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    let _fake = FakeMpv::serve(opts.socket_path.as_ref().unwrap());
    let client = MpvClient::new(opts);
    let ipc = MpvIpc::connect(
      client.socket_path(),
      &client.inner.options.connect,
      client.inner.request_ids.clone(),
      client.inner.bus.clone(),
    )
    .await
    .unwrap();
    let child = Command::new("sleep").arg("0.1").spawn().unwrap();
    client.adopt(child, ipc);

    for _ in 0..200 {
      if client.status() == SessionStatus::Disconnected {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.status(), SessionStatus::Disconnected);
    assert!(!client.is_connected());
    assert!(!client.is_process_alive());

    // Next start goes for a fresh spawn, which fails on the bogus path.
    let err = client.start().await.unwrap_err();
    assert!(matches!(err, MpvError::Process(ProcessError::SpawnFailed(_))));
  }

  #[tokio::test]
  async fn test_commands_without_session_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let client = MpvClient::new(options(dir.path()));
    assert_eq!(client.status(), SessionStatus::NotStarted);
    let err = client.stop().await.unwrap_err();
    assert!(matches!(err, MpvError::NotConnected));
    // Recorded for later, not an error.
    client.observe("pause").await.unwrap();
  }

  #[tokio::test]
  async fn test_command_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _fake) = connected_client(dir.path()).await;
    let err = client.get_property("missing").await.unwrap_err();
    match err {
      MpvError::CommandFailed(reason) => assert_eq!(reason, "property not found"),
      other => panic!("unexpected error: {other}"),
    }
    client.terminate().await;
  }

  #[tokio::test]
  async fn test_quit_sends_quit_then_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let (client, fake) = connected_client(dir.path()).await;
    client.quit().await;
    assert_eq!(fake.verbs(), vec!["quit".to_string()]);
    assert!(!client.is_process_alive());
    assert_eq!(client.status(), SessionStatus::Disconnected);
  }

  #[tokio::test]
  async fn test_quit_without_session_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let client = MpvClient::new(options(dir.path()));
    client.quit().await;
    assert_eq!(client.status(), SessionStatus::NotStarted);
  }

  #[test]
  fn test_sessions_get_distinct_socket_paths() {
    let a = MpvClient::new(SessionOptions::default());
    let b = MpvClient::new(SessionOptions::default());
    assert_ne!(a.socket_path(), b.socket_path());
  }
}
