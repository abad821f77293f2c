//! Playback orchestrator - owns the queue and playback state and drives mpv.
//!
//! State is mutated from two places: user operations (serialised by an async
//! operation lock) and event handlers running on the IPC receive path. Both go
//! through the same state mutex, and handlers never await, so inbound events
//! are applied in the order mpv sent them. The end-of-playback reaction issues
//! commands and therefore runs on its own task under the operation lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use super::backend::PlayerBackend;
use super::queue::MediaItem;
use super::state::{LoopMode, PlaybackState, PlaybackStatus};
use crate::mpv::{
  EventFilter, EventHandler, MpvCommand, MpvError, MpvEvent, MpvMessage, SeekMode, Subscription,
  EOF_PROPERTY, FILE_LOADED, PLAYBACK_ENDED, PROPERTY_CHANGE,
};

const TIME_POS: &str = "time-pos";
const DURATION: &str = "duration";
const PAUSE: &str = "pause";

/// Properties observed after every successful initialisation.
const OBSERVED_PROPERTIES: [&str; 4] = [TIME_POS, DURATION, PAUSE, EOF_PROPERTY];

#[derive(Error, Debug)]
pub enum PlayerError {
  #[error(transparent)]
  Backend(#[from] MpvError),
  #[error("Index {index} is out of range for a queue of {len}")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("Player unavailable: {0}")]
  Unavailable(String),
}

/// How [`PlaybackOrchestrator::enqueue`] places a new item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
  /// Insert right after the current item instead of at the end.
  pub priority: bool,
  /// With `priority`, interrupt the current item and play the new one.
  pub play_now: bool,
}

struct Inner<B> {
  backend: B,
  state: Mutex<PlaybackState>,
  changes: watch::Sender<PlaybackState>,
  op_lock: tokio::sync::Mutex<()>,
  subscriptions: Mutex<Vec<Subscription>>,
  /// Bumped at the start of every load.
  load_generation: AtomicU64,
  initialized: AtomicBool,
}

pub struct PlaybackOrchestrator<B: PlayerBackend> {
  inner: Arc<Inner<B>>,
}

impl<B: PlayerBackend> Clone for PlaybackOrchestrator<B> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<B: PlayerBackend> PlaybackOrchestrator<B> {
  pub fn new(backend: B, autoplay: bool, loop_mode: LoopMode) -> Self {
    let initial = PlaybackState {
      autoplay,
      loop_mode,
      ..Default::default()
    };
    let (changes, _) = watch::channel(initial.clone());

    Self {
      inner: Arc::new(Inner {
        backend,
        state: Mutex::new(initial),
        changes,
        op_lock: tokio::sync::Mutex::new(()),
        subscriptions: Mutex::new(Vec::new()),
        load_generation: AtomicU64::new(0),
        initialized: AtomicBool::new(false),
      }),
    }
  }

  pub fn backend(&self) -> &B {
    &self.inner.backend
  }

  /// Latest state snapshot.
  pub fn state(&self) -> PlaybackState {
    self.inner.state.lock().clone()
  }

  /// Receive a snapshot after every change.
  pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
    self.inner.changes.subscribe()
  }

  /// Mutate state and publish the result if anything changed.
  fn update<R>(&self, f: impl FnOnce(&mut PlaybackState) -> R) -> R {
    let mut state = self.inner.state.lock();
    let result = f(&mut state);
    self.inner.changes.send_if_modified(|published| {
      if *published != *state {
        *published = state.clone();
        true
      } else {
        false
      }
    });
    result
  }

  fn baseline(&self) -> PlaybackStatus {
    if self.inner.initialized.load(Ordering::Acquire) {
      PlaybackStatus::Ready
    } else {
      PlaybackStatus::Idle
    }
  }

  fn ensure_available(&self) -> Result<(), PlayerError> {
    let state = self.inner.state.lock();
    if state.status == PlaybackStatus::Error {
      let reason = state
        .error
        .clone()
        .unwrap_or_else(|| "player is in an error state".to_string());
      return Err(PlayerError::Unavailable(reason));
    }
    Ok(())
  }

  // ---- lifecycle ----

  /// Start the backend, subscribe to its events and observe the playback
  /// properties. No-op when already initialised and healthy.
  pub async fn initialize(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.initialize_locked().await
  }

  async fn initialize_locked(&self) -> Result<(), PlayerError> {
    let status = self.inner.state.lock().status;
    if self.inner.initialized.load(Ordering::Acquire) && status != PlaybackStatus::Error {
      return Ok(());
    }

    log::info!("Initializing player");
    self.inner.subscriptions.lock().clear();
    self.inner.initialized.store(false, Ordering::Release);
    self.update(|s| {
      s.status = PlaybackStatus::Initializing;
      s.error = None;
    });

    match self.connect_backend().await {
      Ok(()) => {
        self.inner.initialized.store(true, Ordering::Release);
        self.update(|s| s.status = PlaybackStatus::Ready);
        log::info!("Player ready");
        Ok(())
      }
      Err(e) => {
        log::error!("Player initialization failed: {}", e);
        self.update(|s| {
          s.status = PlaybackStatus::Error;
          s.is_playing = false;
          s.error = Some(e.to_string());
        });
        Err(e.into())
      }
    }
  }

  async fn connect_backend(&self) -> Result<(), MpvError> {
    let backend = &self.inner.backend;
    backend.start().await?;

    let subscriptions = vec![
      backend.subscribe(
        EventFilter::named(PROPERTY_CHANGE),
        self.handler(Self::on_property_change),
      ),
      backend.subscribe(
        EventFilter::named(FILE_LOADED),
        self.handler(Self::on_file_loaded),
      ),
      backend.subscribe(
        EventFilter::named(PLAYBACK_ENDED),
        self.handler(Self::on_playback_ended),
      ),
    ];
    *self.inner.subscriptions.lock() = subscriptions;

    for name in OBSERVED_PROPERTIES {
      backend.observe(name).await?;
    }
    Ok(())
  }

  /// Wrap a reaction so the registry holds only a weak reference to us.
  fn handler(&self, react: fn(&Self, &MpvEvent)) -> EventHandler {
    let inner = Arc::downgrade(&self.inner);
    Arc::new(move |message: &MpvMessage| {
      let (Some(inner), Some(event)) = (inner.upgrade(), message.as_event()) else {
        return;
      };
      react(&PlaybackOrchestrator { inner }, event);
    })
  }

  // ---- inbound events ----

  fn on_property_change(&self, event: &MpvEvent) {
    let Some(name) = event.name.as_deref() else {
      return;
    };
    let data = event.data.as_ref().unwrap_or(&Value::Null);

    match name {
      TIME_POS => {
        if let Some(position) = data.as_f64() {
          let whole = position.max(0.0).floor() as u64;
          self.update(|s| s.progress_seconds = whole);
        }
      }
      DURATION => {
        let duration = data.as_f64().unwrap_or(0.0);
        self.update(|s| s.duration_seconds = duration);
      }
      PAUSE => {
        let Some(paused) = data.as_bool() else {
          return;
        };
        self.update(|s| {
          // A stale notification must not clobber a load in progress.
          if !s.status.is_active() {
            return;
          }
          s.is_playing = !paused;
          s.status = if paused {
            PlaybackStatus::Paused
          } else {
            PlaybackStatus::Playing
          };
        });
      }
      _ => {}
    }
  }

  fn on_file_loaded(&self, _event: &MpvEvent) {
    self.update(|s| s.mpv_ready = true);
  }

  fn on_playback_ended(&self, _event: &MpvEvent) {
    let generation = self.inner.load_generation.load(Ordering::Acquire);
    let status = self.inner.state.lock().status;
    if !status.is_active() {
      log::debug!("Ignoring end of playback while {}", status);
      return;
    }

    let this = self.clone();
    tokio::spawn(async move {
      this.handle_playback_ended(generation).await;
    });
  }

  async fn handle_playback_ended(&self, generation: u64) {
    let _op = self.inner.op_lock.lock().await;
    if self.inner.load_generation.load(Ordering::Acquire) != generation {
      log::debug!("Discarding end of playback for a superseded load");
      return;
    }

    let (status, loop_mode, autoplay, current, len) = {
      let s = self.inner.state.lock();
      (
        s.status,
        s.loop_mode,
        s.autoplay,
        s.current_index,
        s.queue.len(),
      )
    };
    if !status.is_active() {
      return;
    }
    log::info!(
      "Playback ended (loop: {}, autoplay: {}, index: {:?})",
      loop_mode,
      autoplay,
      current
    );

    let result = match loop_mode {
      LoopMode::One => self.restart_locked().await,
      _ if !autoplay => {
        self.update(|s| {
          s.status = PlaybackStatus::Ended;
          s.is_playing = false;
        });
        Ok(())
      }
      LoopMode::All if len > 0 && current == Some(len - 1) => self.load_locked(0).await,
      _ => self.next_locked().await,
    };

    if let Err(e) = result {
      log::error!("Failed to continue after end of playback: {}", e);
    }
  }

  // ---- commands ----

  async fn command(&self, cmd: MpvCommand) -> Result<Value, PlayerError> {
    Ok(self.inner.backend.command(cmd).await?)
  }

  /// Stop without surfacing errors; there may be nothing to stop.
  async fn stop_quietly(&self) {
    if let Err(e) = self.inner.backend.command(MpvCommand::stop()).await {
      log::debug!("stop ignored: {}", e);
    }
    self.update(|s| s.mpv_ready = false);
  }

  async fn restart_locked(&self) -> Result<(), PlayerError> {
    self.command(MpvCommand::seek(0.0, SeekMode::Absolute)).await?;
    self.command(MpvCommand::set_pause(false)).await?;
    self.update(|s| {
      s.status = PlaybackStatus::Playing;
      s.is_playing = true;
      s.progress_seconds = 0;
    });
    Ok(())
  }

  /// Load and start queue item `index`.
  pub async fn load_by_index(&self, index: usize) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;
    self.load_locked(index).await
  }

  async fn load_locked(&self, index: usize) -> Result<(), PlayerError> {
    let len = self.inner.state.lock().queue.len();
    if index >= len {
      return Err(PlayerError::IndexOutOfRange { index, len });
    }

    if !self.inner.initialized.load(Ordering::Acquire) {
      self.initialize_locked().await?;
    }

    self.inner.load_generation.fetch_add(1, Ordering::AcqRel);
    let item = self.update(|s| {
      s.status = PlaybackStatus::Loading;
      s.current_index = Some(index);
      s.progress_seconds = 0;
      s.duration_seconds = 0.0;
      s.mpv_ready = false;
      s.error = None;
      s.queue.get(index).cloned()
    });
    let Some(item) = item else {
      return Err(PlayerError::IndexOutOfRange { index, len });
    };
    log::info!("Loading [{}] {} ({})", index, item.title, item.id);

    match self.issue_load(&item).await {
      Ok(()) => {
        self.update(|s| {
          s.status = PlaybackStatus::Playing;
          s.is_playing = true;
        });
        Ok(())
      }
      Err(e) => {
        log::error!("Failed to load {}: {}", item.id, e);
        self.update(|s| {
          s.status = PlaybackStatus::Error;
          s.is_playing = false;
          s.error = Some(e.to_string());
        });
        Err(e.into())
      }
    }
  }

  async fn issue_load(&self, item: &MediaItem) -> Result<(), MpvError> {
    let backend = &self.inner.backend;
    backend.start().await?;
    backend.command(MpvCommand::stop()).await?;
    // Events for the previous file all arrive before the stop reply.
    self.update(|s| s.mpv_ready = false);
    backend.command(MpvCommand::loadfile(&item.watch_url())).await?;
    // keep-open leaves mpv paused at the end of the previous file.
    backend.command(MpvCommand::set_pause(false)).await?;
    Ok(())
  }

  /// Resume, restart an ended item, or start the queue from the top.
  pub async fn play(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;
    self.play_locked().await
  }

  async fn play_locked(&self) -> Result<(), PlayerError> {
    let (status, current, empty) = {
      let s = self.inner.state.lock();
      (s.status, s.current_index, s.queue.is_empty())
    };

    match (status, current) {
      (PlaybackStatus::Paused, Some(_)) => {
        self.command(MpvCommand::set_pause(false)).await?;
        self.update(|s| {
          s.status = PlaybackStatus::Playing;
          s.is_playing = true;
        });
        Ok(())
      }
      (PlaybackStatus::Ended | PlaybackStatus::Ready | PlaybackStatus::Idle, Some(index)) => {
        self.load_locked(index).await
      }
      (_, None) if !empty => self.load_locked(0).await,
      _ => Ok(()),
    }
  }

  pub async fn pause(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;
    self.pause_locked().await
  }

  async fn pause_locked(&self) -> Result<(), PlayerError> {
    let has_current = self.inner.state.lock().current_index.is_some();
    if !has_current {
      return Ok(());
    }
    self.command(MpvCommand::set_pause(true)).await?;
    self.update(|s| {
      s.status = PlaybackStatus::Paused;
      s.is_playing = false;
    });
    Ok(())
  }

  pub async fn toggle_play_pause(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;
    let is_playing = self.inner.state.lock().is_playing;
    if is_playing {
      self.pause_locked().await
    } else {
      self.play_locked().await
    }
  }

  /// Advance to the next item. Past the last item playback ends.
  pub async fn next(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;
    self.next_locked().await
  }

  async fn next_locked(&self) -> Result<(), PlayerError> {
    let (current, len) = {
      let s = self.inner.state.lock();
      (s.current_index, s.queue.len())
    };
    if len == 0 {
      return Ok(());
    }

    let target = current.map(|i| i + 1).unwrap_or(0);
    if target < len {
      return self.load_locked(target).await;
    }

    log::info!("Reached the end of the queue");
    self.update(|s| {
      s.status = PlaybackStatus::Ended;
      s.current_index = None;
      s.is_playing = false;
      s.progress_seconds = 0;
      s.mpv_ready = false;
    });
    self.stop_quietly().await;
    Ok(())
  }

  /// Go back one item; on the first item restart it instead.
  pub async fn previous(&self) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;

    let current = self.inner.state.lock().current_index;
    match current {
      None => Ok(()),
      Some(0) => {
        self.command(MpvCommand::seek(0.0, SeekMode::Absolute)).await?;
        self.update(|s| s.progress_seconds = 0);
        Ok(())
      }
      Some(index) => self.load_locked(index - 1).await,
    }
  }

  /// Relative seek. Ignored until mpv has actually loaded the item.
  pub async fn seek(&self, delta_seconds: f64) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;
    self.ensure_available()?;

    let ready = self.inner.state.lock().mpv_ready;
    if !ready {
      log::debug!("Seek ignored, media not loaded yet");
      return Ok(());
    }
    self
      .command(MpvCommand::seek(delta_seconds, SeekMode::Relative))
      .await?;
    Ok(())
  }

  pub fn toggle_autoplay(&self) -> bool {
    self.update(|s| {
      s.autoplay = !s.autoplay;
      s.autoplay
    })
  }

  pub fn cycle_loop_mode(&self) -> LoopMode {
    self.update(|s| {
      s.loop_mode = s.loop_mode.cycle();
      s.loop_mode
    })
  }

  // ---- queue ----

  pub async fn enqueue(&self, item: MediaItem, options: EnqueueOptions) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;

    let (status, current) = {
      let s = self.inner.state.lock();
      (s.status, s.current_index)
    };
    let playing = current.is_some()
      && matches!(
        status,
        PlaybackStatus::Loading | PlaybackStatus::Playing | PlaybackStatus::Paused
      );
    log::info!("Enqueue {} ({:?}, playing: {})", item.id, options, playing);

    if !playing {
      let index = self.update(|s| s.queue.push(item));
      if status == PlaybackStatus::Error {
        return Ok(());
      }
      return self.load_locked(index).await;
    }

    if !options.priority {
      self.update(|s| s.queue.push(item));
      return Ok(());
    }

    let index = self.update(|s| s.queue.insert_after(current, item));
    if options.play_now {
      self.load_locked(index).await
    } else {
      Ok(())
    }
  }

  /// Replace the queue. A valid `start` is loaded; anything else means no
  /// selection.
  pub async fn set_queue(
    &self,
    items: Vec<MediaItem>,
    start: Option<usize>,
  ) -> Result<(), PlayerError> {
    let _op = self.inner.op_lock.lock().await;

    let selection = start.filter(|&i| i < items.len());
    log::info!("Replacing queue with {} items, start {:?}", items.len(), selection);
    let status = self.update(|s| {
      s.queue.replace(items);
      s.current_index = None;
      s.progress_seconds = 0;
      s.duration_seconds = 0.0;
      s.mpv_ready = false;
      s.is_playing = false;
      s.status
    });

    match selection {
      Some(index) if status != PlaybackStatus::Error => self.load_locked(index).await,
      Some(_) => Ok(()),
      None => {
        self.stop_quietly().await;
        let baseline = self.baseline();
        self.update(|s| {
          if s.status != PlaybackStatus::Error {
            s.status = baseline;
          }
        });
        Ok(())
      }
    }
  }

  pub async fn clear_queue(&self) {
    let _op = self.inner.op_lock.lock().await;
    self.stop_quietly().await;

    let baseline = self.baseline();
    self.update(|s| {
      s.queue.clear();
      s.current_index = None;
      s.progress_seconds = 0;
      s.duration_seconds = 0.0;
      s.mpv_ready = false;
      s.is_playing = false;
      if s.status != PlaybackStatus::Error {
        s.status = baseline;
      }
    });
  }
}
