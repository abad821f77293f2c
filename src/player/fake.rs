//! Recording backend used by the orchestrator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use super::backend::PlayerBackend;
use crate::mpv::{
  EventBus, EventFilter, EventHandler, MpvCommand, MpvError, MpvEvent, MpvMessage,
  ProcessError, Subscription, FILE_LOADED, PLAYBACK_ENDED,
};

#[derive(Default)]
pub struct FakeBackend {
  bus: EventBus,
  commands: Mutex<Vec<MpvCommand>>,
  observed: Mutex<Vec<String>>,
  starts: AtomicUsize,
  pub fail_start: Mutex<bool>,
  /// `loadfile` of this URI fails.
  pub fail_uri: Mutex<Option<String>>,
  /// Suppress the `file-loaded` event normally sent after `loadfile`.
  pub silent_loads: Mutex<bool>,
  /// Deliver a late `file-loaded` for the previous file while handling `stop`.
  pub loaded_on_stop: Mutex<bool>,
  /// When set, `loadfile` waits for a notification before answering.
  pub load_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
  pub fn emit(&self, event: MpvEvent) {
    self.bus.dispatch(&MpvMessage::Event(event));
  }

  pub fn emit_property(&self, name: &str, data: Value) {
    self.emit(MpvEvent::property_change(name, data));
  }

  pub fn emit_ended(&self) {
    self.emit(MpvEvent::named(PLAYBACK_ENDED));
  }

  pub fn commands(&self) -> Vec<Vec<Value>> {
    self.commands.lock().iter().map(|c| c.command.clone()).collect()
  }

  pub fn verbs(&self) -> Vec<String> {
    self
      .commands
      .lock()
      .iter()
      .filter_map(|c| c.verb().map(str::to_string))
      .collect()
  }

  pub fn clear_commands(&self) {
    self.commands.lock().clear();
  }

  pub fn observed(&self) -> Vec<String> {
    self.observed.lock().clone()
  }

  pub fn starts(&self) -> usize {
    self.starts.load(Ordering::SeqCst)
  }

  pub fn subscribers(&self) -> usize {
    self.bus.len()
  }
}

impl PlayerBackend for FakeBackend {
  async fn start(&self) -> Result<(), MpvError> {
    self.starts.fetch_add(1, Ordering::SeqCst);
    if *self.fail_start.lock() {
      return Err(ProcessError::NotFound.into());
    }
    Ok(())
  }

  async fn command(&self, cmd: MpvCommand) -> Result<Value, MpvError> {
    self.commands.lock().push(cmd.clone());
    if cmd.verb() == Some("stop") && *self.loaded_on_stop.lock() {
      self.emit(MpvEvent::named(FILE_LOADED));
    }
    if cmd.verb() != Some("loadfile") {
      return Ok(Value::Null);
    }

    let gate = self.load_gate.lock().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    let uri = cmd.command.get(1).and_then(Value::as_str).unwrap_or_default();
    if self.fail_uri.lock().as_deref() == Some(uri) {
      return Err(MpvError::CommandFailed("loading failed".to_string()));
    }
    if !*self.silent_loads.lock() {
      self.emit(MpvEvent::named(FILE_LOADED));
    }
    Ok(Value::Null)
  }

  async fn observe(&self, name: &str) -> Result<(), MpvError> {
    self.observed.lock().push(name.to_string());
    Ok(())
  }

  fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
    self.bus.subscribe(filter, handler)
  }
}
