//! Application configuration loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpv::{ConnectOptions, SessionOptions};
use crate::player::LoopMode;

const CONFIG_DIR: &str = "termtube";
const CONFIG_FILE: &str = "config.json";
const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Invalid config JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// How long to wait for mpv to create its IPC socket.
  #[serde(default = "default_startup_timeout_ms")]
  pub startup_timeout_ms: u64,

  #[serde(default = "default_socket_poll_ms")]
  pub socket_poll_ms: u64,

  #[serde(default = "default_connect_attempts")]
  pub connect_attempts: u32,

  #[serde(default = "default_connect_retry_delay_ms")]
  pub connect_retry_delay_ms: u64,

  /// Per-command response timeout.
  #[serde(default = "default_command_timeout_ms")]
  pub command_timeout_ms: u64,

  /// Advance to the next queue item when one finishes.
  #[serde(default = "default_autoplay")]
  pub autoplay: bool,

  #[serde(default)]
  pub loop_mode: LoopMode,

  /// Custom yt-dlp executable path (None = auto-detect).
  #[serde(default)]
  pub yt_dlp_path: Option<String>,

  /// Number of search results to request.
  #[serde(default = "default_search_limit")]
  pub search_limit: usize,
}

fn default_startup_timeout_ms() -> u64 {
  5000
}

fn default_socket_poll_ms() -> u64 {
  100
}

fn default_connect_attempts() -> u32 {
  5
}

fn default_connect_retry_delay_ms() -> u64 {
  1000
}

fn default_command_timeout_ms() -> u64 {
  5000
}

fn default_autoplay() -> bool {
  true
}

fn default_search_limit() -> usize {
  15
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      startup_timeout_ms: default_startup_timeout_ms(),
      socket_poll_ms: default_socket_poll_ms(),
      connect_attempts: default_connect_attempts(),
      connect_retry_delay_ms: default_connect_retry_delay_ms(),
      command_timeout_ms: default_command_timeout_ms(),
      autoplay: default_autoplay(),
      loop_mode: LoopMode::Off,
      yt_dlp_path: None,
      search_limit: default_search_limit(),
    }
  }
}

impl AppConfig {
  /// `<config_dir>/termtube/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
  }

  /// Load and validate. A missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let config = match std::fs::read_to_string(path) {
      Ok(text) => {
        log::info!("Loading config from {:?}", path);
        serde_json::from_str::<AppConfig>(&text)?
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        log::info!("No config at {:?}, using defaults", path);
        AppConfig::default()
      }
      Err(source) => {
        return Err(ConfigError::Io {
          path: path.to_path_buf(),
          source,
        })
      }
    };
    config.validate()?;
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

    if self.startup_timeout_ms == 0 {
      return invalid("startupTimeoutMs must be greater than zero");
    }
    if self.socket_poll_ms == 0 {
      return invalid("socketPollMs must be greater than zero");
    }
    if self.connect_attempts == 0 {
      return invalid("connectAttempts must be at least 1");
    }
    if self.command_timeout_ms == 0 {
      return invalid("commandTimeoutMs must be greater than zero");
    }
    if self.search_limit == 0 || self.search_limit > MAX_SEARCH_LIMIT {
      return invalid("searchLimit must be between 1 and 50");
    }
    Ok(())
  }

  fn mpv_path(&self) -> Option<PathBuf> {
    self
      .mpv_path
      .as_ref()
      .filter(|s| !s.trim().is_empty())
      .map(PathBuf::from)
  }

  pub fn yt_dlp_path(&self) -> Option<PathBuf> {
    self
      .yt_dlp_path
      .as_ref()
      .filter(|s| !s.trim().is_empty())
      .map(PathBuf::from)
  }

  /// How the MPV session should spawn and connect.
  pub fn session_options(&self) -> SessionOptions {
    SessionOptions {
      mpv_path: self.mpv_path(),
      extra_args: self.mpv_args.clone(),
      socket_path: None,
      startup_timeout: Duration::from_millis(self.startup_timeout_ms),
      socket_poll: Duration::from_millis(self.socket_poll_ms),
      connect: ConnectOptions {
        attempts: self.connect_attempts,
        retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
        command_timeout: Duration::from_millis(self.command_timeout_ms),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config: AppConfig =
      serde_json::from_str(r#"{"mpvArgs":["--volume=50"],"loopMode":"all"}"#).unwrap();
    assert_eq!(config.mpv_args, vec!["--volume=50"]);
    assert_eq!(config.loop_mode, LoopMode::All);
    assert_eq!(config.connect_attempts, 5);
    assert_eq!(config.search_limit, 15);
    assert!(config.autoplay);
  }

  #[test]
  fn test_validate() {
    assert!(AppConfig::default().validate().is_ok());

    let zero_timeout = AppConfig {
      command_timeout_ms: 0,
      ..Default::default()
    };
    assert!(matches!(zero_timeout.validate(), Err(ConfigError::Invalid(_))));

    let no_attempts = AppConfig {
      connect_attempts: 0,
      ..Default::default()
    };
    assert!(no_attempts.validate().is_err());

    for limit in [0, 51] {
      let config = AppConfig {
        search_limit: limit,
        ..Default::default()
      };
      assert!(config.validate().is_err());
    }
  }

  #[test]
  fn test_load_missing_and_invalid_files() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("none.json");
    assert_eq!(AppConfig::load(&missing).unwrap(), AppConfig::default());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{").unwrap();
    assert!(matches!(AppConfig::load(&broken), Err(ConfigError::Json(_))));

    let invalid = dir.path().join("invalid.json");
    std::fs::write(&invalid, r#"{"searchLimit":100}"#).unwrap();
    assert!(matches!(AppConfig::load(&invalid), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn test_session_options() {
    let config = AppConfig {
      mpv_path: Some("  ".to_string()),
      connect_retry_delay_ms: 250,
      ..Default::default()
    };
    let options = config.session_options();
    assert_eq!(options.mpv_path, None);
    assert_eq!(options.connect.retry_delay, Duration::from_millis(250));
    assert_eq!(options.startup_timeout, Duration::from_secs(5));
  }
}
