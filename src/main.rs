mod cache;
mod config;
mod db;
mod event;
mod logging;
mod net;
mod notify;
mod queue;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::event::{Event, EventHandler};
use crate::net::{HttpNetwork, Request};
use crate::queue::EntityType;
use crate::sync::ConnectivityMonitor;
use crate::worker::{ControlMessage, Worker};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline-resilient request cache and durable mutation sync queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prefetch the manifest into the current cache generation
  Install,
  /// Purge old cache generations and start serving
  Activate,
  /// Run one read request through the worker
  Fetch {
    url: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Queue a write for the next background sync
  Enqueue {
    #[arg(value_enum)]
    entity_type: EntityType,
    #[arg(long)]
    id: String,
    /// JSON payload posted on sync
    payload: String,
  },
  /// Send a write now, queueing it if the endpoint is unreachable
  Submit {
    #[arg(value_enum)]
    entity_type: EntityType,
    #[arg(long)]
    id: String,
    payload: String,
  },
  /// List pending writes
  Queue {
    #[arg(value_enum)]
    entity_type: Option<EntityType>,
  },
  /// Run one sync trigger, e.g. background-referral-sync
  Sync { tag: String },
  /// Render the notification for a push payload
  Push { payload: Option<String> },
  /// Resolve a notification click against the open client windows
  Click {
    /// Button pressed; omit for a click on the notification body
    #[arg(long)]
    action: Option<String>,
    /// URL of an open client window (repeatable)
    #[arg(long = "client")]
    clients: Vec<String>,
  },
  /// Deliver a control message, e.g. '{"type":"SKIP_WAITING"}'
  Message { data: String },
  /// Install, activate, then sync whenever connectivity returns
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let worker = Arc::new(Worker::from_config(&config)?);

  match args.command {
    Command::Install => {
      let report = worker.handle_install().await;
      println!("cached {} resources", report.cached);
      for url in report.failed {
        println!("failed: {}", url);
      }
    }
    Command::Activate => {
      for name in worker.handle_activate().await {
        println!("purged {}", name);
      }
    }
    Command::Fetch { url, navigate } => {
      let url = worker
        .origin()
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };

      let served = worker.handle_fetch(request).await;
      println!(
        "{} {} ({:?})",
        served.response.status, served.response.status_text, served.source
      );
      if let Some(content_type) = served.response.header("Content-Type") {
        println!("content-type: {}", content_type);
      }
      if let Some(cached_at) = served.cached_at {
        println!("cached at {}", cached_at);
      }
      println!();
      println!("{}", served.response.text());
    }
    Command::Enqueue {
      entity_type,
      id,
      payload,
    } => {
      worker
        .enqueue(entity_type, &id, parse_payload(&payload)?)
        .await?;
      println!("queued {} {}", entity_type, id);
    }
    Command::Submit {
      entity_type,
      id,
      payload,
    } => {
      let outcome = worker
        .submit(entity_type, &id, parse_payload(&payload)?)
        .await?;
      println!("{:?}", outcome);
    }
    Command::Queue { entity_type } => {
      let types = match entity_type {
        Some(t) => vec![t],
        None => EntityType::ALL.to_vec(),
      };
      for t in types {
        for mutation in worker.pending(t).await? {
          println!("{}", serde_json::to_string(&mutation)?);
        }
      }
    }
    Command::Sync { tag } => match worker.handle_sync_tag(&tag).await {
      Some(report) => println!(
        "attempted {}, synced {}, failed {}",
        report.attempted, report.synced, report.failed
      ),
      None => println!("ignored unknown tag {}", tag),
    },
    Command::Push { payload } => {
      let notification = worker.handle_push(payload.as_deref().map(str::as_bytes));
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    Command::Click { action, clients } => {
      let clients = clients
        .iter()
        .map(|c| Url::parse(c).map_err(|e| eyre!("Invalid client URL '{}': {}", c, e)))
        .collect::<Result<Vec<_>>>()?;
      println!(
        "{:?}",
        worker.handle_notification_click(action.as_deref(), &clients)
      );
    }
    Command::Message { data } => match ControlMessage::parse(&data) {
      Some(message) => worker.handle_message(message).await,
      None => println!("ignored message"),
    },
    Command::Run => run(Arc::clone(&worker), &config).await?,
  }

  worker.shutdown().await;
  Ok(())
}

/// Long-running mode: the process stays up and drains the queues each time
/// connectivity is restored.
async fn run(worker: Arc<Worker<HttpNetwork>>, config: &config::Config) -> Result<()> {
  worker.handle_install().await;
  worker.handle_activate().await;

  let mut events = EventHandler::new();
  let probe_url: Url = config.origin_url()?;
  let monitor = ConnectivityMonitor::new(worker.network(), probe_url, config.probe_interval());
  let probe = monitor.spawn(events.sender());

  info!(origin = %worker.origin(), "Worker running");

  let mut tasks = Vec::new();
  while let Some(event) = events.next().await {
    match event {
      Event::Sync(trigger) => {
        let worker = Arc::clone(&worker);
        tasks.push(tokio::spawn(async move {
          worker.handle_sync(trigger).await;
        }));
        tasks.retain(|t| !t.is_finished());
      }
      Event::Shutdown => break,
    }
  }

  probe.abort();
  join_sync_tasks(tasks).await;

  Ok(())
}

/// Wait for in-flight sync runs. Returns how many ended abnormally.
async fn join_sync_tasks(tasks: Vec<JoinHandle<()>>) -> usize {
  let mut failed = 0;
  for task in tasks {
    if let Err(e) = task.await {
      warn!("Sync task did not complete: {}", e);
      failed += 1;
    }
  }
  failed
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
  serde_json::from_str(payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_panicked_sync_task_is_reported() {
    let tasks = vec![
      tokio::spawn(async {}),
      tokio::spawn(async {
        if true {
          panic!("sync run blew up");
        }
      }),
    ];
    assert_eq!(join_sync_tasks(tasks).await, 1);
  }

  #[test]
  fn test_parse_payload_rejects_invalid_json() {
    assert!(parse_payload("{\"company\": \"Acme\"}").is_ok());
    assert!(parse_payload("{company").is_err());
  }
}
