//! Search and playlist expansion through the `yt-dlp` command.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use super::{format_duration, CatalogError, PlaylistProvider, SearchProvider};
use crate::player::MediaItem;

/// One line of `yt-dlp --flat-playlist --dump-json`.
#[derive(Debug, Deserialize)]
struct Entry {
  id: String,
  #[serde(default)]
  title: Option<String>,
  #[serde(default)]
  channel: Option<String>,
  #[serde(default)]
  uploader: Option<String>,
  #[serde(default)]
  duration: Option<f64>,
  #[serde(default)]
  thumbnail: Option<String>,
  #[serde(default)]
  thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
  url: String,
  #[serde(default)]
  width: Option<u32>,
  #[serde(default)]
  height: Option<u32>,
}

impl Entry {
  fn best_thumbnail(&self) -> Option<String> {
    self
      .thumbnails
      .iter()
      .enumerate()
      .max_by_key(|(index, t)| {
        let area = u64::from(t.width.unwrap_or(0)) * u64::from(t.height.unwrap_or(0));
        // Later entries are larger when sizes are unknown.
        (area, *index)
      })
      .map(|(_, t)| t.url.clone())
      .or_else(|| self.thumbnail.clone())
  }

  fn into_item(self) -> MediaItem {
    let thumbnail = self.best_thumbnail();
    MediaItem {
      title: self.title.unwrap_or_else(|| self.id.clone()),
      author: self.channel.or(self.uploader).unwrap_or_default(),
      duration: self
        .duration
        .map(|d| format_duration(d.max(0.0) as u64))
        .unwrap_or_default(),
      thumbnail,
      id: self.id,
    }
  }
}

fn parse_entries(stdout: &[u8]) -> Result<Vec<MediaItem>, CatalogError> {
  String::from_utf8_lossy(stdout)
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| -> Result<MediaItem, CatalogError> {
      Ok(serde_json::from_str::<Entry>(line)?.into_item())
    })
    .collect()
}

#[derive(Debug, Clone)]
pub struct YtDlp {
  program: PathBuf,
  search_limit: usize,
}

impl YtDlp {
  /// Use `program`, or find `yt-dlp` on PATH.
  pub fn new(program: Option<PathBuf>, search_limit: usize) -> Result<Self, CatalogError> {
    let program = match program {
      Some(path) => path,
      None => which::which("yt-dlp").map_err(|_| CatalogError::NotFound)?,
    };
    log::info!("Using yt-dlp at {:?}", program);
    Ok(Self {
      program,
      search_limit,
    })
  }

  async fn dump(&self, target: &str) -> Result<Vec<MediaItem>, CatalogError> {
    log::debug!("yt-dlp {}", target);
    let output = Command::new(&self.program)
      .arg("--flat-playlist")
      .arg("--dump-json")
      .arg("--no-warnings")
      .arg(target)
      .stdin(Stdio::null())
      .kill_on_drop(true)
      .output()
      .await?;

    if !output.status.success() {
      return Err(CatalogError::Failed {
        status: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    let items = parse_entries(&output.stdout)?;
    log::info!("yt-dlp returned {} items for {}", items.len(), target);
    Ok(items)
  }
}

impl SearchProvider for YtDlp {
  async fn search(&self, query: &str) -> Result<Vec<MediaItem>, CatalogError> {
    self
      .dump(&format!("ytsearch{}:{}", self.search_limit, query))
      .await
  }
}

impl PlaylistProvider for YtDlp {
  async fn playlist(&self, id: &str) -> Result<Vec<MediaItem>, CatalogError> {
    let target = if id.contains("://") {
      id.to_string()
    } else {
      format!("https://www.youtube.com/playlist?list={}", id)
    };
    self.dump(&target).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_flat_entries() {
    let stdout = br#"{"_type":"url","id":"abc","title":"First","channel":"Chan","duration":245.0,"thumbnails":[{"url":"s.jpg","width":120,"height":90},{"url":"l.jpg","width":480,"height":360}]}

{"_type":"url","id":"def","uploader":"Up","thumbnails":[{"url":"a.jpg"},{"url":"b.jpg"}]}
"#;
    let items = parse_entries(stdout).unwrap();
    assert_eq!(items.len(), 2);

    assert_eq!(items[0].id, "abc");
    assert_eq!(items[0].title, "First");
    assert_eq!(items[0].author, "Chan");
    assert_eq!(items[0].duration, "4:05");
    assert_eq!(items[0].thumbnail.as_deref(), Some("l.jpg"));

    assert_eq!(items[1].title, "def");
    assert_eq!(items[1].author, "Up");
    assert_eq!(items[1].duration, "");
    assert_eq!(items[1].thumbnail.as_deref(), Some("b.jpg"));
  }

  #[test]
  fn test_parse_rejects_garbage() {
    assert!(matches!(
      parse_entries(b"WARNING: something\n"),
      Err(CatalogError::Json(_))
    ));
  }

  #[tokio::test]
  async fn test_failed_run_reports_status() {
    let ytdlp = YtDlp::new(Some(PathBuf::from("false")), 5).unwrap();
    let err = ytdlp.search("anything").await.unwrap_err();
    assert!(matches!(err, CatalogError::Failed { status: Some(1), .. }));
  }

  #[tokio::test]
  async fn test_missing_program_is_spawn_error() {
    let ytdlp = YtDlp::new(Some(PathBuf::from("/nonexistent/yt-dlp")), 5).unwrap();
    let err = ytdlp.playlist("PL1").await.unwrap_err();
    assert!(matches!(err, CatalogError::Spawn(_)));
  }
}
