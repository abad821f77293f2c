//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name mpv uses for observed property updates.
pub const PROPERTY_CHANGE: &str = "property-change";
/// Event name mpv sends once a file has been opened and decoding starts.
pub const FILE_LOADED: &str = "file-loaded";
/// Derived event emitted when the end-of-stream property flips to true.
/// Consumers react to this instead of watching `eof-reached` themselves.
pub const PLAYBACK_ENDED: &str = "playback-ended";
/// Property whose transition to `true` produces [`PLAYBACK_ENDED`].
pub const EOF_PROPERTY: &str = "eof-reached";

/// How a seek offset is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
  Relative,
  Absolute,
}

impl SeekMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      SeekMode::Relative => "relative",
      SeekMode::Absolute => "absolute",
    }
  }
}

/// Command to send to MPV. The request id is attached by the channel at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct MpvCommand {
  pub command: Vec<Value>,
}

impl MpvCommand {
  pub fn new(args: Vec<Value>) -> Self {
    Self { command: args }
  }

  /// Load a URI, replacing whatever is currently playing.
  pub fn loadfile(uri: &str) -> Self {
    Self::new(vec!["loadfile".into(), uri.into(), "replace".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::new(vec!["set_property".into(), "pause".into(), paused.into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  pub fn seek(offset: f64, mode: SeekMode) -> Self {
    Self::new(vec!["seek".into(), offset.into(), mode.as_str().into()])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: u64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Stop playback and clear the playlist; mpv stays idle.
  pub fn stop() -> Self {
    Self::new(vec!["stop".into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }

  /// First element of the command array.
  pub fn verb(&self) -> Option<&str> {
    self.command.first().and_then(Value::as_str)
  }
}

/// One outbound record as it appears on the wire.
#[derive(Debug, Serialize)]
pub(crate) struct MpvRequest<'a> {
  pub command: &'a [Value],
  pub request_id: u64,
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: u64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "file-loaded").
  pub event: String,
  /// Observer ID for property-change events.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  /// Property name for property-change events.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  /// Event data.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

impl MpvEvent {
  pub fn named(event: &str) -> Self {
    Self {
      event: event.to_string(),
      ..Default::default()
    }
  }

  pub fn property_change(name: &str, data: Value) -> Self {
    Self {
      event: PROPERTY_CHANGE.to_string(),
      name: Some(name.to_string()),
      data: Some(data),
      ..Default::default()
    }
  }

  /// Data of a property-change event for `name`. `Some(Null)` when mpv
  /// reports the property as unavailable.
  pub fn property(&self, name: &str) -> Option<&Value> {
    if self.event != PROPERTY_CHANGE || self.name.as_deref() != Some(name) {
      return None;
    }
    Some(self.data.as_ref().unwrap_or(&Value::Null))
  }
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("event").is_some() {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    } else if value.get("request_id").is_some() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Err(<serde_json::Error as serde::de::Error>::custom(
        "message has neither `event` nor `request_id`",
      ))
    }
  }

  /// Event name, `None` for command responses.
  pub fn event_name(&self) -> Option<&str> {
    match self {
      MpvMessage::Event(e) => Some(&e.event),
      MpvMessage::Response(_) => None,
    }
  }

  pub fn as_event(&self) -> Option<&MpvEvent> {
    match self {
      MpvMessage::Event(e) => Some(e),
      MpvMessage::Response(_) => None,
    }
  }
}
