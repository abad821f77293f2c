//! Where media items come from: free-text search and playlist expansion.

mod ytdlp;

use std::future::Future;

use thiserror::Error;
use url::Url;

use crate::player::MediaItem;

pub use ytdlp::YtDlp;

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("yt-dlp executable not found")]
  NotFound,
  #[error("Failed to run yt-dlp: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("yt-dlp exited with {status:?}: {stderr}")]
  Failed { status: Option<i32>, stderr: String },
  #[error("Unexpected yt-dlp output: {0}")]
  Json(#[from] serde_json::Error),
}

/// Ordered results for a free-text query.
pub trait SearchProvider: Send + Sync {
  fn search(&self, query: &str)
    -> impl Future<Output = Result<Vec<MediaItem>, CatalogError>> + Send;
}

/// Ordered items of a playlist.
pub trait PlaylistProvider: Send + Sync {
  fn playlist(&self, id: &str)
    -> impl Future<Output = Result<Vec<MediaItem>, CatalogError>> + Send;
}

/// `list` query parameter of a playlist URL.
pub fn playlist_id_from_url(url: &str) -> Option<String> {
  query_param(url, "list")
}

/// Video id of a watch URL (`?v=`) or a short `youtu.be/<id>` link.
pub fn video_id_from_url(url: &str) -> Option<String> {
  let parsed = Url::parse(url).ok()?;
  if parsed.host_str() == Some("youtu.be") {
    return parsed
      .path_segments()?
      .next()
      .filter(|id| !id.is_empty())
      .map(str::to_string);
  }
  query_param(url, "v")
}

fn query_param(url: &str, key: &str) -> Option<String> {
  let parsed = Url::parse(url).ok()?;
  let value = parsed
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.into_owned());
  value.filter(|v| !v.is_empty())
}

/// `M:SS`, minutes unbounded.
pub fn format_duration(total_seconds: u64) -> String {
  format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(0), "0:00");
    assert_eq!(format_duration(65), "1:05");
    assert_eq!(format_duration(600), "10:00");
    assert_eq!(format_duration(3725), "62:05");
  }

  #[test]
  fn test_playlist_id_from_url() {
    assert_eq!(
      playlist_id_from_url("https://www.youtube.com/playlist?list=PL123abc"),
      Some("PL123abc".to_string())
    );
    assert_eq!(
      playlist_id_from_url("https://www.youtube.com/watch?v=abc&list=RDabc&index=2"),
      Some("RDabc".to_string())
    );
    assert_eq!(playlist_id_from_url("https://www.youtube.com/watch?v=abc"), None);
    assert_eq!(playlist_id_from_url("not a url"), None);
  }

  #[test]
  fn test_video_id_from_url() {
    assert_eq!(
      video_id_from_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
      Some("dQw4w9WgXcQ".to_string())
    );
    assert_eq!(
      video_id_from_url("https://youtu.be/dQw4w9WgXcQ?si=x"),
      Some("dQw4w9WgXcQ".to_string())
    );
    assert_eq!(video_id_from_url("https://youtu.be/"), None);
    assert_eq!(video_id_from_url("https://www.youtube.com/playlist?list=PL1"), None);
  }
}
