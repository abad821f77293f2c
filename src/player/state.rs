//! Playback state snapshot published by the orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::queue::{MediaItem, Queue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlaybackStatus {
  #[default]
  Idle,
  Initializing,
  Loading,
  Playing,
  Paused,
  Ended,
  Error,
  Ready,
}

impl PlaybackStatus {
  /// Something is loaded and mpv is producing (or holding) output.
  pub fn is_active(self) -> bool {
    matches!(self, PlaybackStatus::Playing | PlaybackStatus::Paused)
  }
}

impl fmt::Display for PlaybackStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// What happens when the current item finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
  #[default]
  Off,
  /// Repeat the current item.
  One,
  /// Wrap to the start of the queue after the last item.
  All,
}

impl LoopMode {
  pub fn cycle(self) -> Self {
    match self {
      LoopMode::Off => LoopMode::One,
      LoopMode::One => LoopMode::All,
      LoopMode::All => LoopMode::Off,
    }
  }
}

impl fmt::Display for LoopMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      LoopMode::Off => "off",
      LoopMode::One => "one",
      LoopMode::All => "all",
    })
  }
}

impl FromStr for LoopMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "off" => Ok(LoopMode::Off),
      "one" => Ok(LoopMode::One),
      "all" => Ok(LoopMode::All),
      other => Err(format!("unknown loop mode: {other}")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
  pub status: PlaybackStatus,
  pub queue: Queue,
  /// Always `None` or a valid index into `queue`.
  pub current_index: Option<usize>,
  pub progress_seconds: u64,
  pub duration_seconds: f64,
  pub loop_mode: LoopMode,
  pub autoplay: bool,
  /// True once the item being loaded has actually started.
  pub mpv_ready: bool,
  pub is_playing: bool,
  pub error: Option<String>,
}

impl Default for PlaybackState {
  fn default() -> Self {
    Self {
      status: PlaybackStatus::Idle,
      queue: Queue::new(),
      current_index: None,
      progress_seconds: 0,
      duration_seconds: 0.0,
      loop_mode: LoopMode::Off,
      autoplay: true,
      mpv_ready: false,
      is_playing: false,
      error: None,
    }
  }
}

impl PlaybackState {
  pub fn current_item(&self) -> Option<&MediaItem> {
    self.current_index.and_then(|i| self.queue.get(i))
  }
}
