//! The seam between the orchestrator and the media process.

use std::future::Future;

use serde_json::Value;

use crate::mpv::{EventFilter, EventHandler, MpvClient, MpvCommand, MpvError, Subscription};

/// What the orchestrator needs from a media backend.
///
/// [`MpvClient`] is the real implementation; tests drive the orchestrator
/// through a recording fake.
pub trait PlayerBackend: Send + Sync + 'static {
  /// Make sure the backend is running and connected. Idempotent.
  fn start(&self) -> impl Future<Output = Result<(), MpvError>> + Send;

  /// Send one command and return its `data`.
  fn command(&self, cmd: MpvCommand) -> impl Future<Output = Result<Value, MpvError>> + Send;

  /// Ask for change notifications on a property.
  fn observe(&self, name: &str) -> impl Future<Output = Result<(), MpvError>> + Send;

  fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription;
}

impl PlayerBackend for MpvClient {
  async fn start(&self) -> Result<(), MpvError> {
    MpvClient::start(self).await
  }

  async fn command(&self, cmd: MpvCommand) -> Result<Value, MpvError> {
    MpvClient::command(self, cmd).await
  }

  async fn observe(&self, name: &str) -> Result<(), MpvError> {
    MpvClient::observe(self, name).await
  }

  fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
    MpvClient::subscribe(self, filter, handler)
  }
}
