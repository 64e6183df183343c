mod app;
mod cache;
mod config;
mod db;
mod event;
mod local;
mod logging;
mod messages;
mod net;
mod status;
mod sync;
#[cfg(test)]
mod test_support;
mod util;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use url::Url;

use crate::app::{ActionOutcome, App};
use crate::cache::RouteOutcome;
use crate::net::{Request, RequestDestination};
use crate::sync::ActionKind;

#[derive(Parser, Debug)]
#[command(name = "quiter-offline")]
#[command(about = "Offline app-shell cache and action sync queue for Quiter")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/quiter-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin to serve, overrides the config file
  #[arg(short, long, global = true)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the manifest into the static cache of the current version
  Install,
  /// Delete caches of other versions
  Activate,
  /// Route one request through the caches and print the body
  Fetch {
    /// Path relative to the origin, or an absolute URL
    path: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination (image, script, style, font, document)
    #[arg(long)]
    destination: Option<RequestDestination>,
  },
  /// Print cache and offline storage statistics as JSON
  Stats,
  /// Perform a user action, queueing it when offline
  Action {
    /// post_comment, like_post or save_progress
    kind: ActionKind,
    /// JSON payload
    payload: String,
  },
  /// Replay queued actions
  Drain,
  /// Key/value cache with expiry
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
  /// Install, then watch connectivity and serve messages from stdin
  Run,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  Set {
    key: String,
    /// JSON value
    value: String,
    /// Time to live in milliseconds (default from config)
    #[arg(long)]
    ttl_ms: Option<u64>,
  },
  Get {
    key: String,
  },
  Remove {
    key: String,
  },
  /// Remove expired items
  Sweep,
}

fn parse_json(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON {:?}: {}", raw, e))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Long-running mode also logs to a file; keep the guard alive until exit
  let _log_guard = if matches!(args.command, Command::Run) {
    let dir = db::Database::data_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create {}: {}", dir.display(), e))?;
    Some(logging::init_with_file(&dir))
  } else {
    logging::init();
    None
  };

  let config = config::Config::load(args.config.as_deref(), args.origin)?;
  let app = App::new(config.clone())?;

  match args.command {
    Command::Install => {
      let count = app.install().await?;
      println!("Cached {} assets in {}", count, app.lifecycle().version().static_name());
    }
    Command::Activate => {
      let deleted = app.activate()?;
      print_json(&json!({ "deleted": deleted }))?;
    }
    Command::Fetch {
      path,
      navigate,
      destination,
    } => {
      let url = config.resolve(&path)?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }

      match app.route(request).await? {
        RouteOutcome::Passthrough => eprintln!("cross-origin request, not handled"),
        RouteOutcome::Respond(routed) => {
          eprintln!(
            "{} {:?} {}",
            routed.response.status,
            routed.source,
            routed.response.content_type().unwrap_or("-")
          );
          std::io::stdout().write_all(&routed.response.body)?;
          // Let the background refresh finish before the runtime shuts down
          if let Some(refresh) = routed.revalidation {
            let _ = refresh.await;
          }
        }
      }
    }
    Command::Stats => {
      app.refresh_connectivity().await;
      print_json(&json!({
        "caches": app.cache_stats()?,
        "offline": app.offline_stats(),
      }))?;
    }
    Command::Action { kind, payload } => {
      let payload = parse_json(&payload)?;
      app.refresh_connectivity().await;
      match app.handle_action(kind, payload).await? {
        ActionOutcome::Completed(answer) => print_json(&answer)?,
        ActionOutcome::QueuedOffline(item) => print_json(&json!({ "offline": true, "id": item.id }))?,
      }
    }
    Command::Drain => {
      if !app.refresh_connectivity().await {
        return Err(eyre!(
          "{} is unreachable; {} actions stay queued",
          config.origin,
          app.queue().len()
        ));
      }
      print_json(&app.drain().await)?;
    }
    Command::Cache { command } => match command {
      CacheCommand::Set { key, value, ttl_ms } => {
        app.ttl().set(&key, &parse_json(&value)?, ttl_ms)?;
      }
      CacheCommand::Get { key } => match app.ttl().get::<Value>(&key) {
        Some(value) => print_json(&value)?,
        None => return Err(eyre!("No cached value for {}", key)),
      },
      CacheCommand::Remove { key } => app.ttl().remove(&key),
      CacheCommand::Sweep => println!("Removed {} expired items", app.ttl().sweep_expired()),
    },
    Command::Run => app.run().await?,
  }

  Ok(())
}
