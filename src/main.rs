mod app;
mod cache;
mod config;
mod event;
mod intercept;
mod mail;
mod net;
mod notify;
mod state;

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::mail::Submission;

#[derive(Parser, Debug)]
#[command(name = "relais")]
#[command(about = "Offline-resilient contact form delivery agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/relais/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the agent: precache, watch connectivity, drain the queue
  Run,
  /// Submit one form (JSON from a file, or stdin when omitted)
  Submit {
    /// Path to a JSON submission
    file: Option<PathBuf>,
  },
  /// Attempt delivery of every pending queued message
  Reconcile,
  /// Show cache version and queued messages
  Status,
  /// Drop every cache partition
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = setup_tracing();

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(config)?;

  match args.command {
    Command::Run => app.run().await?,
    Command::Submit { file } => {
      let submission = read_submission(file.as_deref())?;
      let outcome = app.submit_once(submission).await;
      println!("{}", serde_json::to_string_pretty(&outcome)?);
      if !outcome.success {
        std::process::exit(1);
      }
    }
    Command::Reconcile => {
      let delivered = app.reconcile_once().await;
      info!("Delivered {} queued message(s)", delivered);
    }
    Command::Status => app.print_status().await?,
    Command::ClearCache => {
      app.clear_cache().await?;
      info!("Cache cleared");
    }
  }

  Ok(())
}

fn read_submission(path: Option<&std::path::Path>) -> Result<Submission> {
  let contents = match path {
    Some(p) => std::fs::read_to_string(p)
      .map_err(|e| eyre!("Failed to read submission {}: {}", p.display(), e))?,
    None => {
      let mut buf = String::new();
      std::io::stdin().read_to_string(&mut buf)?;
      buf
    }
  };

  serde_json::from_str(&contents).map_err(|e| eyre!("Invalid submission JSON: {}", e))
}

fn setup_tracing() -> tracing_appender::non_blocking::WorkerGuard {
  use tracing_subscriber::EnvFilter;

  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relais=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}
