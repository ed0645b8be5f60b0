use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use offcache::cache::{CacheStore, SqliteStorage, SystemClock};
use offcache::deferred::Notification;
use offcache::event::EventQueue;
use offcache::http::{Destination, ReqwestNetwork, Request};
use offcache::lifecycle::{EventOutcome, LifecycleController, LifecycleEvent};
use offcache::{Config, Host};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Drive the offline request cache from the command line")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the static partition from the manifest
  Install,
  /// Delete partitions of superseded generations
  Activate,
  /// Install, then activate
  Deploy,
  /// Fetch URLs through the cache
  Fetch {
    urls: Vec<String>,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the requests as image loads
    #[arg(long)]
    image: bool,
  },
  /// Deliver a connectivity-restored event
  Sync { tag: String },
  /// Deliver a push message payload (JSON)
  Push { payload: String },
  /// List partitions and their entries
  Partitions,
}

/// Host for command-line use: there are no clients to take over, and
/// notifications are printed.
struct ConsoleHost;

#[async_trait]
impl Host for ConsoleHost {
  async fn activate_immediately(&self) {
    info!("host: activating immediately");
  }

  async fn take_over_existing_connections(&self) {
    info!("host: taking over existing connections");
  }

  async fn show_notification(&self, notification: Notification) {
    println!(
      "[notification] {}: {} (icon {}, badge {})",
      notification.title, notification.body, notification.icon, notification.badge
    );
  }
}

fn init_tracing(log_stderr: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offcache=info"));

  if log_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let appender = tracing_appender::rolling::daily(log_dir, "offcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_stderr)?;

  let config = Arc::new(Config::load(args.config.as_deref())?);
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(ReqwestNetwork::new(&config)?);
  let controller = Arc::new(LifecycleController::new(
    Arc::clone(&config),
    storage,
    network,
    Arc::new(SystemClock),
    Arc::new(ConsoleHost),
  ));

  match args.command {
    Command::Install => print_install(controller.on_install().await),
    Command::Activate => print_activation(controller.on_activate().await?),
    Command::Deploy => {
      print_install(controller.on_install().await);
      print_activation(controller.on_activate().await?);
    }
    Command::Fetch {
      urls,
      method,
      image,
    } => {
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut requests = Vec::with_capacity(urls.len());
      for url in &urls {
        let mut request = Request::new(method.clone(), config.resolve(url)?);
        if image {
          request = request.with_destination(Destination::Image);
        } else if request.is_get() {
          request = request.with_destination(Destination::Document);
        }
        requests.push(request);
      }

      fetch_all(Arc::clone(&controller), requests).await;
    }
    Command::Sync { tag } => {
      if let EventOutcome::Synced(report) = controller.dispatch(LifecycleEvent::Sync(tag)).await {
        println!("sync: {} completed, {} failed", report.completed, report.failed);
      }
    }
    Command::Push { payload } => {
      if let EventOutcome::Pushed(None) = controller
        .dispatch(LifecycleEvent::Push(payload.into_bytes()))
        .await
      {
        println!("push payload dropped (see log)");
      }
    }
    Command::Partitions => {
      let storage = controller.storage();
      for name in storage.list_partitions()? {
        let stale = controller.generations().is_stale(&name);
        println!("{}{}", name, if stale { "  (superseded)" } else { "" });
        for url in storage.list_entries(&name)? {
          println!("  {}", url);
        }
      }
    }
  }

  controller.settle().await;
  Ok(())
}

async fn fetch_all(controller: Arc<LifecycleController<SqliteStorage>>, requests: Vec<Request>) {
  let (queue, sender) = EventQueue::new();
  let runner = tokio::spawn(queue.run(controller));

  let outcomes = futures::future::join_all(requests.into_iter().map(|request| {
    let sender = sender.clone();
    async move {
      let url = request.url.clone();
      (url, sender.send(LifecycleEvent::Fetch(request)).await)
    }
  }))
  .await;
  drop(sender);

  for (url, outcome) in outcomes {
    match outcome {
      Some(EventOutcome::Fetched(Ok(result))) => println!(
        "{} {} ({} bytes, {})",
        result.data.status,
        url,
        result.data.body.len(),
        result.source
      ),
      Some(EventOutcome::Fetched(Err(e))) => println!("ERR {} ({})", url, e),
      _ => println!("ERR {} (event queue closed)", url),
    }
  }

  if let Err(e) = runner.await {
    tracing::warn!(error = %e, "event queue task failed");
  }
}

fn print_install(report: offcache::lifecycle::InstallReport) {
  println!(
    "install: {} stored, {} failed",
    report.stored.len(),
    report.failed.len()
  );
  for entry in report.failed {
    println!("  failed: {}", entry);
  }
}

fn print_activation(report: offcache::lifecycle::ActivationReport) {
  println!("activated generation {}", report.generation);
  for name in report.deleted {
    println!("  deleted: {}", name);
  }
}
