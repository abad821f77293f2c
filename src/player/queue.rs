//! Media items and the play queue.

use serde::{Deserialize, Serialize};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// A playable item as returned by search or playlist expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
  pub id: String,
  pub title: String,
  pub author: String,
  /// Display label such as `3:45`.
  pub duration: String,
  #[serde(default)]
  pub thumbnail: Option<String>,
}

impl MediaItem {
  pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      author: String::new(),
      duration: String::new(),
      thumbnail: None,
    }
  }

  /// URI handed to mpv. Full URLs and absolute paths pass through unchanged.
  pub fn watch_url(&self) -> String {
    if self.id.contains("://") || self.id.starts_with('/') {
      self.id.clone()
    } else {
      format!("{}{}", WATCH_URL, self.id)
    }
  }
}

/// Ordered list of items. Indices are only ever validated by the owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Queue {
  items: Vec<MediaItem>,
}

impl Queue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, item: MediaItem) -> usize {
    self.items.push(item);
    self.items.len() - 1
  }

  /// Insert right after `current` (or at the front with no current item).
  /// Returns the index the item landed on.
  pub fn insert_after(&mut self, current: Option<usize>, item: MediaItem) -> usize {
    let index = current
      .map(|c| (c + 1).min(self.items.len()))
      .unwrap_or(0);
    self.items.insert(index, item);
    index
  }

  pub fn replace(&mut self, items: Vec<MediaItem>) {
    self.items = items;
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  pub fn get(&self, index: usize) -> Option<&MediaItem> {
    self.items.get(index)
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
    self.items.iter()
  }
}

impl From<Vec<MediaItem>> for Queue {
  fn from(items: Vec<MediaItem>) -> Self {
    Self { items }
  }
}
