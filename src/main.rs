use std::process::ExitCode;

use clap::Parser;
use termtube::cli::Cli;
use termtube::logging;

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  let log_dir = cli.log_dir.clone().unwrap_or_else(logging::default_log_dir);
  let _guard = match logging::init(&log_dir, cli.verbosity) {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("Warning: file logging disabled: {}", e);
      None
    }
  };

  match termtube::run(cli).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      log::error!("{}", e);
      eprintln!("termtube: {}", e);
      ExitCode::FAILURE
    }
  }
}
