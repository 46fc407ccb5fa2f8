mod config;
mod event;
mod interceptor;
mod lifecycle;
mod manifest;
mod message;
mod net;
mod store;
mod sweeper;
mod update;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::event::EventHandler;
use crate::interceptor::{Destination, FetchOutcome, FetchRequest};
use crate::message::{ControlMessage, ControlReply};
use crate::store::{CacheStore, MemoryStore, SqliteStore};
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline application-shell cache worker with versioned updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory instead of on disk
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured version, then keep it maintained
  Run,
  /// Resolve one request through the fetch interceptor and print the result
  Fetch {
    /// Root-relative path to fetch
    path: String,

    /// Treat the request as a top-level document navigation
    #[arg(long)]
    document: bool,
  },
  /// Run one update check and print the result
  CheckUpdates,
  /// Print per-generation entry counts and URLs
  CacheInfo,
  /// Delete every cache generation
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config);

  let command = args.command.unwrap_or(Command::Run);

  if args.ephemeral {
    let worker = Worker::new(config, MemoryStore::new())?;
    dispatch(worker, command).await
  } else {
    let store = match &config.app.db_path {
      Some(path) => SqliteStore::open_at(path)?,
      None => SqliteStore::open()?,
    };
    let worker = Worker::new(config, store)?;
    dispatch(worker, command).await
  }
}

async fn dispatch<S: CacheStore + 'static>(mut worker: Worker<S>, command: Command) -> Result<()> {
  match command {
    Command::Run => {
      worker.start().await?;

      // A zero period would make the interval timer panic.
      let mut events = EventHandler::new(
        Duration::from_secs(worker.config().update.check_interval_secs.max(1)),
        Duration::from_secs(worker.config().sweep.interval_secs.max(1)),
      );
      worker.run(&mut events).await
    }
    Command::Fetch { path, document } => {
      let url = worker
        .config()
        .origin_url()?
        .join(&path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
      let destination = if document {
        Destination::Document
      } else {
        Destination::from_path(&path)
      };

      match worker.handle_fetch(FetchRequest::get(url, destination)).await? {
        FetchOutcome::Intercepted(result) => {
          println!(
            "{} {} ({} bytes, {:?})",
            result.response.status,
            result.response.header("content-type").unwrap_or("-"),
            result.response.body.len(),
            result.source
          );
          // One-shot invocation: let the opportunistic write land before exit.
          if let Some(write) = result.cache_write {
            let _ = write.await;
          }
        }
        FetchOutcome::PassThrough => println!("pass-through"),
      }
      Ok(())
    }
    Command::CheckUpdates => {
      let reply = worker.handle_message(ControlMessage::CheckUpdates).await?;
      print_reply(reply)
    }
    Command::CacheInfo => {
      let reply = worker.handle_message(ControlMessage::GetCacheInfo).await?;
      print_reply(reply)
    }
    Command::ClearCache => {
      let reply = worker.handle_message(ControlMessage::ClearCache).await?;
      print_reply(reply)
    }
  }
}

fn print_reply(reply: Option<ControlReply>) -> Result<()> {
  if let Some(reply) = reply {
    let json =
      serde_json::to_string_pretty(&reply).map_err(|e| eyre!("Failed to render reply: {}", e))?;
    println!("{}", json);
  }
  Ok(())
}

/// Initialize tracing to stderr, or to a rolling file when `log_dir` is set.
///
/// Returns the appender guard; dropping it flushes buffered log lines.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "shellcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
