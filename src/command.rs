//! Console commands - the line-oriented front end that drives the player.

use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::catalog::{
  playlist_id_from_url, video_id_from_url, CatalogError, PlaylistProvider, SearchProvider,
};
use crate::player::{
  EnqueueOptions, MediaItem, PlaybackOrchestrator, PlaybackState, PlayerBackend, PlayerError,
};

pub const HELP: &str = "\
commands:
  init                 start mpv
  search <query>       search and list results
  add <n>              queue result n at the end
  next-up <n>          queue result n after the current item
  now <n>              play result n right away
  open <url>           play a playlist, video or stream URL
  play | pause         resume / pause
  toggle (or enter)    toggle play/pause
  n | p                next / previous
  seek <+-secs>        relative seek
  autoplay | loop      toggle autoplay / cycle loop mode
  queue | status       show queue / current state
  clear                stop and empty the queue
  quit                 exit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
  Init,
  Search(String),
  /// 1-based index into the last search results.
  Add(usize),
  NextUp(usize),
  Now(usize),
  Open(String),
  Play,
  Pause,
  Toggle,
  Next,
  Previous,
  Seek(f64),
  Autoplay,
  Loop,
  Queue,
  Clear,
  Status,
  Help,
  Quit,
}

impl FromStr for UserCommand {
  type Err = String;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
      Some((verb, rest)) => (verb, rest.trim()),
      None => (line, ""),
    };
    let verb = verb.to_ascii_lowercase();

    let result_number = || {
      rest
        .parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| format!("usage: {} <result number>", verb))
    };
    let text = |usage: &str| {
      if rest.is_empty() {
        Err(format!("usage: {}", usage))
      } else {
        Ok(rest.to_string())
      }
    };

    match verb.as_str() {
      "" | "toggle" | "t" => Ok(UserCommand::Toggle),
      "init" => Ok(UserCommand::Init),
      "search" | "s" => Ok(UserCommand::Search(text("search <query>")?)),
      "add" | "a" => Ok(UserCommand::Add(result_number()?)),
      "next-up" | "nu" => Ok(UserCommand::NextUp(result_number()?)),
      "now" => Ok(UserCommand::Now(result_number()?)),
      "open" | "o" => Ok(UserCommand::Open(text("open <url>")?)),
      "play" => Ok(UserCommand::Play),
      "pause" => Ok(UserCommand::Pause),
      "n" | "next" => Ok(UserCommand::Next),
      "p" | "prev" | "previous" => Ok(UserCommand::Previous),
      "seek" => rest
        .parse::<f64>()
        .map(UserCommand::Seek)
        .map_err(|_| "usage: seek <+-seconds>".to_string()),
      "autoplay" => Ok(UserCommand::Autoplay),
      "loop" => Ok(UserCommand::Loop),
      "queue" => Ok(UserCommand::Queue),
      "clear" => Ok(UserCommand::Clear),
      "status" => Ok(UserCommand::Status),
      "help" | "h" | "?" => Ok(UserCommand::Help),
      "quit" | "exit" | "q" => Ok(UserCommand::Quit),
      other => Err(format!("unknown command: {} (try help)", other)),
    }
  }
}

#[derive(Error, Debug)]
pub enum CommandError {
  #[error(transparent)]
  Player(#[from] PlayerError),
  #[error(transparent)]
  Catalog(#[from] CatalogError),
  #[error("No search result #{0}")]
  NoSuchResult(usize),
  #[error("Not a playable URL: {0}")]
  BadUrl(String),
}

/// What the console should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Text(String),
  Silent,
  Quit,
}

/// Owns the last search results and turns commands into player calls.
pub struct Console<C, B: PlayerBackend> {
  player: PlaybackOrchestrator<B>,
  catalog: C,
  results: Vec<MediaItem>,
}

impl<C, B> Console<C, B>
where
  C: SearchProvider + PlaylistProvider,
  B: PlayerBackend,
{
  pub fn new(player: PlaybackOrchestrator<B>, catalog: C) -> Self {
    Self {
      player,
      catalog,
      results: Vec::new(),
    }
  }

  pub fn player(&self) -> &PlaybackOrchestrator<B> {
    &self.player
  }

  pub async fn execute(&mut self, command: UserCommand) -> Result<Reply, CommandError> {
    log::debug!("Console command: {:?}", command);
    match command {
      UserCommand::Init => {
        self.player.initialize().await?;
        Ok(Reply::Text("player ready".to_string()))
      }
      UserCommand::Search(query) => {
        self.results = self.catalog.search(&query).await?;
        Ok(Reply::Text(format_results(&self.results)))
      }
      UserCommand::Add(n) => self.enqueue(n, EnqueueOptions::default()).await,
      UserCommand::NextUp(n) => {
        let options = EnqueueOptions {
          priority: true,
          play_now: false,
        };
        self.enqueue(n, options).await
      }
      UserCommand::Now(n) => {
        let options = EnqueueOptions {
          priority: true,
          play_now: true,
        };
        self.enqueue(n, options).await
      }
      UserCommand::Open(url) => self.open(&url).await,
      UserCommand::Play => {
        self.player.play().await?;
        Ok(Reply::Silent)
      }
      UserCommand::Pause => {
        self.player.pause().await?;
        Ok(Reply::Silent)
      }
      UserCommand::Toggle => {
        self.player.toggle_play_pause().await?;
        Ok(Reply::Silent)
      }
      UserCommand::Next => {
        self.player.next().await?;
        Ok(Reply::Silent)
      }
      UserCommand::Previous => {
        self.player.previous().await?;
        Ok(Reply::Silent)
      }
      UserCommand::Seek(delta) => {
        self.player.seek(delta).await?;
        Ok(Reply::Silent)
      }
      UserCommand::Autoplay => {
        let on = self.player.toggle_autoplay();
        Ok(Reply::Text(format!("autoplay {}", on_off(on))))
      }
      UserCommand::Loop => {
        let mode = self.player.cycle_loop_mode();
        Ok(Reply::Text(format!("loop {}", mode)))
      }
      UserCommand::Queue => Ok(Reply::Text(format_queue(&self.player.state()))),
      UserCommand::Clear => {
        self.player.clear_queue().await;
        Ok(Reply::Text("queue cleared".to_string()))
      }
      UserCommand::Status => Ok(Reply::Text(format_status(&self.player.state()))),
      UserCommand::Help => Ok(Reply::Text(HELP.to_string())),
      UserCommand::Quit => Ok(Reply::Quit),
    }
  }

  async fn enqueue(&mut self, n: usize, options: EnqueueOptions) -> Result<Reply, CommandError> {
    let item = n
      .checked_sub(1)
      .and_then(|i| self.results.get(i))
      .cloned()
      .ok_or(CommandError::NoSuchResult(n))?;
    let title = item.title.clone();
    self.player.enqueue(item, options).await?;
    Ok(Reply::Text(format!("queued: {}", title)))
  }

  async fn open(&mut self, url: &str) -> Result<Reply, CommandError> {
    if let Some(list) = playlist_id_from_url(url) {
      let items = self.catalog.playlist(&list).await?;
      let count = items.len();
      self.player.set_queue(items, Some(0)).await?;
      return Ok(Reply::Text(format!("playing playlist ({} items)", count)));
    }

    let item = if let Some(id) = video_id_from_url(url) {
      MediaItem::new(id, url)
    } else if url.contains("://") || url.starts_with('/') {
      MediaItem::new(url, url)
    } else {
      return Err(CommandError::BadUrl(url.to_string()));
    };
    self.player.set_queue(vec![item], Some(0)).await?;
    Ok(Reply::Silent)
  }
}

fn on_off(value: bool) -> &'static str {
  if value {
    "on"
  } else {
    "off"
  }
}

fn clock(seconds: u64) -> String {
  format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn format_results(items: &[MediaItem]) -> String {
  if items.is_empty() {
    return "no results".to_string();
  }
  let mut out = String::new();
  for (i, item) in items.iter().enumerate() {
    let _ = writeln!(
      out,
      "{:>3}. {} - {} [{}]",
      i + 1,
      item.title,
      item.author,
      item.duration
    );
  }
  out.trim_end().to_string()
}

pub fn format_queue(state: &PlaybackState) -> String {
  if state.queue.is_empty() {
    return "queue is empty".to_string();
  }
  let mut out = String::new();
  for (i, item) in state.queue.iter().enumerate() {
    let marker = if state.current_index == Some(i) { ">" } else { " " };
    let _ = writeln!(out, "{} {:>3}. {} - {}", marker, i + 1, item.title, item.author);
  }
  out.trim_end().to_string()
}

/// One-line summary, also used by the status printer.
pub fn format_status(state: &PlaybackState) -> String {
  let now = match (state.current_index, state.current_item()) {
    (Some(i), Some(item)) => format!(
      " {}/{} {} - {} {}/{}",
      i + 1,
      state.queue.len(),
      item.title,
      item.author,
      clock(state.progress_seconds),
      clock(state.duration_seconds.max(0.0) as u64),
    ),
    _ => String::new(),
  };
  let error = state
    .error
    .as_deref()
    .map(|e| format!(" ({})", e))
    .unwrap_or_default();
  format!(
    "[{}]{}{} loop:{} autoplay:{}",
    state.status,
    now,
    error,
    state.loop_mode,
    on_off(state.autoplay)
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::player::fake::FakeBackend;
  use crate::player::{LoopMode, PlaybackStatus};
  use parking_lot::Mutex;

  #[derive(Default)]
  struct FakeCatalog {
    playlists: Mutex<Vec<String>>,
  }

  fn item(id: &str) -> MediaItem {
    MediaItem {
      id: id.to_string(),
      title: format!("Title {}", id),
      author: "Someone".to_string(),
      duration: "3:00".to_string(),
      thumbnail: None,
    }
  }

  impl SearchProvider for FakeCatalog {
    async fn search(&self, _query: &str) -> Result<Vec<MediaItem>, CatalogError> {
      Ok(vec![item("r1"), item("r2"), item("r3")])
    }
  }

  impl PlaylistProvider for FakeCatalog {
    async fn playlist(&self, id: &str) -> Result<Vec<MediaItem>, CatalogError> {
      self.playlists.lock().push(id.to_string());
      Ok(vec![item("p1"), item("p2")])
    }
  }

  fn console() -> Console<FakeCatalog, FakeBackend> {
    let player = PlaybackOrchestrator::new(FakeBackend::default(), true, LoopMode::Off);
    Console::new(player, FakeCatalog::default())
  }

  fn ids(console: &Console<FakeCatalog, FakeBackend>) -> Vec<String> {
    console
      .player()
      .state()
      .queue
      .iter()
      .map(|i| i.id.clone())
      .collect()
  }

  #[test]
  fn test_parse_commands() {
    assert_eq!("".parse::<UserCommand>(), Ok(UserCommand::Toggle));
    assert_eq!("  search  lofi beats ".parse::<UserCommand>(), Ok(UserCommand::Search("lofi beats".into())));
    assert_eq!("add 2".parse::<UserCommand>(), Ok(UserCommand::Add(2)));
    assert_eq!("NOW 1".parse::<UserCommand>(), Ok(UserCommand::Now(1)));
    assert_eq!("seek -10".parse::<UserCommand>(), Ok(UserCommand::Seek(-10.0)));
    assert_eq!("seek +5".parse::<UserCommand>(), Ok(UserCommand::Seek(5.0)));
    assert_eq!("n".parse::<UserCommand>(), Ok(UserCommand::Next));
    assert_eq!("p".parse::<UserCommand>(), Ok(UserCommand::Previous));
    assert_eq!("quit".parse::<UserCommand>(), Ok(UserCommand::Quit));

    assert!("add 0".parse::<UserCommand>().is_err());
    assert!("add".parse::<UserCommand>().is_err());
    assert!("search".parse::<UserCommand>().is_err());
    assert!("seek forward".parse::<UserCommand>().is_err());
    assert!("dance".parse::<UserCommand>().is_err());
  }

  #[tokio::test]
  async fn test_search_then_queue_results() {
    let mut console = console();
    let reply = console.execute(UserCommand::Search("x".into())).await.unwrap();
    let Reply::Text(listing) = reply else {
      panic!("expected a listing");
    };
    assert!(listing.starts_with("  1. Title r1 - Someone [3:00]"));

    console.execute(UserCommand::Add(2)).await.unwrap();
    assert_eq!(console.player().state().status, PlaybackStatus::Playing);
    console.execute(UserCommand::Add(3)).await.unwrap();
    console.execute(UserCommand::NextUp(1)).await.unwrap();
    assert_eq!(ids(&console), vec!["r2", "r1", "r3"]);

    console.execute(UserCommand::Now(3)).await.unwrap();
    assert_eq!(ids(&console), vec!["r2", "r3", "r1", "r3"]);
    assert_eq!(console.player().state().current_index, Some(1));

    let err = console.execute(UserCommand::Add(9)).await.unwrap_err();
    assert!(matches!(err, CommandError::NoSuchResult(9)));
  }

  #[tokio::test]
  async fn test_open_playlist_and_video() {
    let mut console = console();
    console
      .execute(UserCommand::Open(
        "https://www.youtube.com/playlist?list=PLabc".into(),
      ))
      .await
      .unwrap();
    assert_eq!(console.catalog.playlists.lock().clone(), vec!["PLabc"]);
    assert_eq!(ids(&console), vec!["p1", "p2"]);
    assert_eq!(console.player().state().current_index, Some(0));

    console
      .execute(UserCommand::Open("https://youtu.be/vid123".into()))
      .await
      .unwrap();
    assert_eq!(ids(&console), vec!["vid123"]);
    assert_eq!(console.player().state().status, PlaybackStatus::Playing);

    let err = console
      .execute(UserCommand::Open("not-a-url".into()))
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::BadUrl(_)));
  }

  #[tokio::test]
  async fn test_toggles_and_quit() {
    let mut console = console();
    assert_eq!(
      console.execute(UserCommand::Loop).await.unwrap(),
      Reply::Text("loop one".into())
    );
    assert_eq!(
      console.execute(UserCommand::Autoplay).await.unwrap(),
      Reply::Text("autoplay off".into())
    );
    assert_eq!(console.execute(UserCommand::Quit).await.unwrap(), Reply::Quit);
  }

  #[test]
  fn test_format_status() {
    let mut state = PlaybackState::default();
    assert_eq!(format_status(&state), "[Idle] loop:off autoplay:on");

    state.queue.push(item("a"));
    state.current_index = Some(0);
    state.status = PlaybackStatus::Playing;
    state.progress_seconds = 75;
    state.duration_seconds = 180.4;
    assert_eq!(
      format_status(&state),
      "[Playing] 1/1 Title a - Someone 1:15/3:00 loop:off autoplay:on"
    );
    assert!(format_queue(&state).starts_with(">   1. Title a"));
  }
}
