//! Async IPC connection to MPV over its Unix socket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::EventBus;
use super::protocol::{
  MpvCommand, MpvEvent, MpvMessage, MpvRequest, MpvResponse, EOF_PROPERTY, PLAYBACK_ENDED,
};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed after {attempts} attempt(s): {reason}")]
  ConnectFailed { attempts: u32, reason: String },
  #[error("Write failed: {0}")]
  Write(#[from] std::io::Error),
  #[error("Failed to encode command: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("Command timeout (request_id={request_id})")]
  Timeout { request_id: u64 },
  #[error("Disconnected")]
  Disconnected,
  #[error("Not connected")]
  NotConnected,
  #[error("Malformed frame: {0}")]
  MalformedFrame(String),
}

/// Connection tuning taken from the application config.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
  pub attempts: u32,
  pub retry_delay: Duration,
  pub command_timeout: Duration,
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self {
      attempts: 5,
      retry_delay: Duration::from_secs(1),
      command_timeout: Duration::from_secs(5),
    }
  }
}

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<Result<MpvResponse, IpcError>>;

/// IPC connection state shared between writer and reader.
struct IpcState {
  pending: HashMap<u64, PendingRequest>,
  open: bool,
}

impl IpcState {
  /// Mark closed and fail everything still waiting.
  fn close(&mut self) {
    self.open = false;
    for (_, tx) in self.pending.drain() {
      let _ = tx.send(Err(IpcError::Disconnected));
    }
  }
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
  Close,
}

/// MPV IPC connection.
pub struct MpvIpc {
  state: Arc<Mutex<IpcState>>,
  write_tx: async_channel::Sender<WriteMessage>,
  request_ids: Arc<AtomicU64>,
  command_timeout: Duration,
  cancel: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect to the MPV socket, retrying with a fixed delay.
  pub async fn connect(
    path: &Path,
    options: &ConnectOptions,
    request_ids: Arc<AtomicU64>,
    bus: EventBus,
  ) -> Result<Self, IpcError> {
    let attempts = options.attempts.max(1);
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
      if attempt > 1 {
        tokio::time::sleep(options.retry_delay).await;
      }

      match tokio::net::UnixStream::connect(path).await {
        Ok(stream) => {
          log::info!("Connected to MPV IPC socket {:?} (attempt {})", path, attempt);
          let (reader, writer) = tokio::io::split(stream);
          return Ok(Self::setup(
            reader,
            writer,
            request_ids,
            bus,
            options.command_timeout,
          ));
        }
        Err(e) => {
          log::info!(
            "IPC connect attempt {}/{} failed: {}",
            attempt,
            attempts,
            e
          );
          last_error = e.to_string();
        }
      }
    }

    Err(IpcError::ConnectFailed {
      attempts,
      reason: last_error,
    })
  }

  /// Wrap an already-open byte stream. Spawns the reader and writer tasks.
  pub fn setup<R, W>(
    reader: R,
    writer: W,
    request_ids: Arc<AtomicU64>,
    bus: EventBus,
    command_timeout: Duration,
  ) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let state = Arc::new(Mutex::new(IpcState {
      pending: HashMap::new(),
      open: true,
    }));
    let cancel = CancellationToken::new();

    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let reader_state = state.clone();
    let reader_cancel = cancel.clone();
    let reader_handle = tokio::spawn(async move {
      tokio::select! {
        _ = Self::reader_loop(reader, reader_state.clone(), bus) => {}
        _ = reader_cancel.cancelled() => {
          log::debug!("MPV IPC reader cancelled");
        }
      }
      reader_state.lock().close();
    });

    let writer_state = state.clone();
    let writer_cancel = cancel.clone();
    let writer_handle = tokio::spawn(async move {
      tokio::select! {
        _ = Self::writer_loop(writer, write_rx) => {}
        _ = writer_cancel.cancelled() => {}
      }
      writer_state.lock().close();
    });

    Self {
      state,
      write_tx,
      request_ids,
      command_timeout,
      cancel,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<IpcState>>,
    bus: EventBus,
  ) {
    log::info!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut eof_reached = false;

    loop {
      buf.clear();
      match buf_reader.read_until(b'\n', &mut buf).await {
        Ok(0) => {
          log::info!("MPV IPC connection closed");
          break;
        }
        Ok(_) => {
          let line = String::from_utf8_lossy(&buf);
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }

          let message = match MpvMessage::parse(trimmed) {
            Ok(message) => message,
            Err(e) => {
              let err = IpcError::MalformedFrame(e.to_string());
              log::warn!("Dropping MPV line: {} - {}", err, trimmed);
              continue;
            }
          };

          if let MpvMessage::Response(response) = &message {
            log::debug!(
              "MPV reader: received response for request_id={}",
              response.request_id
            );
            let waiter = state.lock().pending.remove(&response.request_id);
            if let Some(tx) = waiter {
              let _ = tx.send(Ok(response.clone()));
            }
          }

          bus.dispatch(&message);

          if let Some(ended) = Self::derive_playback_ended(&message, &mut eof_reached) {
            log::info!("MPV reached end of stream");
            bus.dispatch(&ended);
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }
  }

  /// Turn a false->true change of the end-of-stream property into the
  /// derived playback-ended event.
  fn derive_playback_ended(message: &MpvMessage, eof_reached: &mut bool) -> Option<MpvMessage> {
    let value = message.as_event()?.property(EOF_PROPERTY)?;
    let now = value.as_bool().unwrap_or(false);
    let was = std::mem::replace(eof_reached, now);
    (now && !was).then(|| MpvMessage::Event(MpvEvent::named(PLAYBACK_ENDED)))
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: async_channel::Receiver<WriteMessage>,
  ) {
    log::info!("MPV IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Command(mut data) => {
          data.push(b'\n');
          if let Err(e) = writer.write_all(&data).await {
            log::error!("MPV IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("MPV IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          log::info!("MPV IPC writer closing");
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }

  /// Send a command to MPV and wait for the response carrying its request id.
  pub async fn send_command(&self, cmd: &MpvCommand) -> Result<MpvResponse, IpcError> {
    let request_id = self.request_ids.fetch_add(1, Ordering::Relaxed);

    let (tx, rx) = oneshot::channel();
    {
      let mut state = self.state.lock();
      if !state.open {
        return Err(IpcError::NotConnected);
      }
      state.pending.insert(request_id, tx);
    }

    let json = match serde_json::to_vec(&MpvRequest {
      command: &cmd.command,
      request_id,
    }) {
      Ok(json) => json,
      Err(e) => {
        self.state.lock().pending.remove(&request_id);
        return Err(e.into());
      }
    };
    log::debug!(
      "Sending MPV command: {}",
      String::from_utf8_lossy(&json)
    );

    if self.write_tx.send(WriteMessage::Command(json)).await.is_err() {
      self.state.lock().pending.remove(&request_id);
      return Err(IpcError::Disconnected);
    }

    match tokio::time::timeout(self.command_timeout, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => {
        log::error!("MPV IPC channel closed unexpectedly");
        Err(IpcError::Disconnected)
      }
      Err(_) => {
        log::error!(
          "MPV command timeout after {:?}, request_id={}",
          self.command_timeout,
          request_id
        );
        self.state.lock().pending.remove(&request_id);
        Err(IpcError::Timeout { request_id })
      }
    }
  }

  pub fn is_open(&self) -> bool {
    self.state.lock().open
  }

  /// Close the connection.
  pub fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
    self.cancel.cancel();
    self.state.lock().close();
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
