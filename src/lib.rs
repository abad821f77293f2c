use std::path::PathBuf;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod catalog;
pub mod cli;
pub mod command;
pub mod config;
pub mod logging;
pub mod mpv;
pub mod player;

use catalog::{CatalogError, YtDlp};
use cli::Cli;
use command::{format_status, Console, Reply, UserCommand};
pub use config::{AppConfig, ConfigError};
use mpv::MpvClient;
use player::{PlaybackOrchestrator, PlaybackState};

#[derive(Error, Debug)]
pub enum AppError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Catalog(#[from] CatalogError),
  #[error("Console input failed: {0}")]
  Io(#[from] std::io::Error),
}

/// Print a line whenever the status or the current item changes.
fn spawn_status_printer(mut rx: watch::Receiver<PlaybackState>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut last = {
      let state = rx.borrow_and_update();
      (state.status, state.current_index)
    };
    while rx.changed().await.is_ok() {
      let line = {
        let state = rx.borrow_and_update();
        let key = (state.status, state.current_index);
        if key == last {
          continue;
        }
        last = key;
        format_status(&state)
      };
      println!("{}", line);
    }
  })
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
  cli.config.clone().or_else(AppConfig::default_path)
}

/// Load config, build the session and player, and run the console until
/// `quit`, end of input or Ctrl-C. MPV is always shut down on the way out.
pub async fn run(cli: Cli) -> Result<(), AppError> {
  let mut config = match config_path(&cli) {
    Some(path) => AppConfig::load(&path)?,
    None => AppConfig::default(),
  };
  cli.apply(&mut config);
  config.validate()?;

  let catalog = YtDlp::new(config.yt_dlp_path(), config.search_limit)?;
  let client = MpvClient::new(config.session_options());
  log::info!("MPV session socket: {:?}", client.socket_path());

  let player = PlaybackOrchestrator::new(client.clone(), config.autoplay, config.loop_mode);
  let printer = spawn_status_printer(player.subscribe_state());
  let mut console = Console::new(player, catalog);

  println!("termtube - type `help` for commands");
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  let result = loop {
    let line = tokio::select! {
      line = lines.next_line() => line,
      _ = tokio::signal::ctrl_c() => {
        log::info!("Interrupted");
        break Ok(());
      }
    };

    let line = match line {
      Ok(Some(line)) => line,
      Ok(None) => break Ok(()),
      Err(e) => break Err(AppError::from(e)),
    };

    let command = match line.parse::<UserCommand>() {
      Ok(command) => command,
      Err(usage) => {
        println!("{}", usage);
        continue;
      }
    };

    match console.execute(command).await {
      Ok(Reply::Quit) => break Ok(()),
      Ok(Reply::Text(text)) => println!("{}", text),
      Ok(Reply::Silent) => {}
      Err(e) => {
        log::warn!("Command failed: {}", e);
        println!("error: {}", e);
      }
    }
  };

  printer.abort();
  client.quit().await;
  log::info!("termtube stopped");
  result
}
