//! Subscriber registry for inbound MPV messages.
//!
//! Dispatch clones the subscriber list before calling anyone, so handlers may
//! subscribe or unsubscribe (themselves included) while a message is being
//! delivered. An entry removed mid-dispatch is skipped for the rest of that
//! dispatch and never called again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::protocol::MpvMessage;

/// Which messages a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
  /// Every message, including command responses.
  Any,
  /// Events whose `event` field equals this name.
  Named(String),
}

impl EventFilter {
  pub fn named(name: &str) -> Self {
    EventFilter::Named(name.to_string())
  }

  pub fn matches(&self, message: &MpvMessage) -> bool {
    match self {
      EventFilter::Any => true,
      EventFilter::Named(name) => message.event_name() == Some(name.as_str()),
    }
  }
}

impl From<&str> for EventFilter {
  fn from(value: &str) -> Self {
    if value == "*" {
      EventFilter::Any
    } else {
      EventFilter::named(value)
    }
  }
}

pub type EventHandler = Arc<dyn Fn(&MpvMessage) + Send + Sync>;

struct Subscriber {
  id: u64,
  filter: EventFilter,
  handler: EventHandler,
  active: AtomicBool,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  subscribers: Vec<Arc<Subscriber>>,
}

/// Fan-out point shared by the session and each connection's reader task.
#[derive(Clone, Default)]
pub struct EventBus {
  registry: Arc<Mutex<Registry>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a handler. Dropping the returned handle unsubscribes it.
  pub fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
    let mut registry = self.registry.lock();
    registry.next_id += 1;
    let subscriber = Arc::new(Subscriber {
      id: registry.next_id,
      filter,
      handler,
      active: AtomicBool::new(true),
    });
    registry.subscribers.push(subscriber.clone());
    log::debug!(
      "Subscriber {} registered for {:?}",
      subscriber.id,
      subscriber.filter
    );

    Subscription {
      subscriber: Arc::downgrade(&subscriber),
      registry: Arc::downgrade(&self.registry),
    }
  }

  /// Deliver a message to every matching subscriber.
  pub fn dispatch(&self, message: &MpvMessage) {
    let snapshot = self.registry.lock().subscribers.clone();
    for subscriber in snapshot {
      if !subscriber.active.load(Ordering::Acquire) {
        continue;
      }
      if subscriber.filter.matches(message) {
        (subscriber.handler)(message);
      }
    }
  }

  pub fn len(&self) -> usize {
    self.registry.lock().subscribers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
  subscriber: Weak<Subscriber>,
  registry: Weak<Mutex<Registry>>,
}

impl Subscription {
  /// Remove the handler. Safe to call more than once and from inside a handler.
  pub fn unsubscribe(&self) {
    let Some(subscriber) = self.subscriber.upgrade() else {
      return;
    };
    if !subscriber.active.swap(false, Ordering::AcqRel) {
      return;
    }
    if let Some(registry) = self.registry.upgrade() {
      registry
        .lock()
        .subscribers
        .retain(|s| s.id != subscriber.id);
      log::debug!("Subscriber {} removed", subscriber.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
