use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
  #[clap(short, long, env = "TERMTUBE_CONFIG")]
  /// Config file. (defaults to <config dir>/termtube/config.json)
  pub config: Option<PathBuf>,

  #[clap(long)]
  /// MPV executable. (overrides any config value)
  pub mpv_path: Option<PathBuf>,

  #[clap(long, default_value_t = false)]
  /// Start with autoplay disabled.
  pub no_autoplay: bool,

  #[clap(short, long)]
  /// Log level
  pub verbosity: Option<tracing::Level>,

  #[clap(long)]
  /// Directory for the log file.
  pub log_dir: Option<PathBuf>,
}

impl Cli {
  /// Apply command-line overrides on top of the file config.
  pub fn apply(&self, config: &mut AppConfig) {
    if let Some(path) = &self.mpv_path {
      config.mpv_path = Some(path.to_string_lossy().into_owned());
    }
    if self.no_autoplay {
      config.autoplay = false;
    }
  }
}
