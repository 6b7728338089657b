use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use offline_sync::cache::{CacheStorage, SqliteStorage};
use offline_sync::config::Config;
use offline_sync::net::{HttpNetwork, Network, Request, Response};
use offline_sync::queue::{DeferredActionQueue, DrainReport};
use offline_sync::{Interception, LifecycleController, Message, MessageReply};

type Controller = LifecycleController<SqliteStorage, HttpNetwork>;

#[derive(Parser, Debug)]
#[command(name = "offline-sync")]
#[command(about = "Offline request cache and deferred-action outbox")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prime the shell manifest for the configured version
  Install {
    /// Activate right away instead of waiting
    #[arg(long)]
    activate: bool,
  },
  /// Promote the installed version and delete superseded caches
  Activate,
  /// Send one request through the interception point
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as "Name: value"; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Cache a single resource (e.g. recitation audio) for offline use
  Prime { url: String },
  /// Post a raw JSON message, e.g. '{"type":"SKIP_WAITING"}'
  Message { payload: String },
  /// Replay deferred actions
  Sync {
    /// Background-sync tag; without one the outbox drains unconditionally
    #[arg(long)]
    tag: Option<String>,
  },
  /// Show lifecycle state, cache generations and outbox size
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = init_logging(&data_dir)?;

  let controller = open_controller(config, &data_dir)?;

  match args.command {
    Command::Install { activate } => {
      controller.install().await?;
      if activate {
        controller.skip_waiting()?;
      }
      println!(
        "installed {} ({:?})",
        controller.generations().version(),
        controller.state()
      );
    }
    Command::Activate => {
      controller.resume()?;
      controller.skip_waiting()?;
      println!("serving {}", controller.generations().version());
    }
    Command::Fetch {
      url,
      method,
      headers,
      data,
      navigate,
    } => {
      controller.resume()?;
      let request = build_request(controller.config(), &url, &method, &headers, data, navigate)?;
      let response = match controller.handle_fetch(request.clone()).await {
        Interception::Respond(response) => response,
        Interception::PassThrough => controller.network().fetch(&request).await?,
      };
      print_response(&response);
    }
    Command::Prime { url } => {
      let reply = controller.message(Message::CacheAudio { url }).await;
      print_reply(&reply)?;
    }
    Command::Message { payload } => {
      controller.resume()?;
      let reply = controller.message_json(payload.as_bytes()).await?;
      print_reply(&reply)?;
    }
    Command::Sync { tag } => {
      let report = match tag {
        Some(tag) => controller.sync(&tag).await?,
        None => Some(controller.reconnect().await?),
      };
      match report {
        Some(report) => print_drain(&report),
        None => println!("tag ignored"),
      }
    }
    Command::Status => {
      controller.resume()?;
      print_status(&controller)?;
    }
  }

  Ok(())
}

fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "offline-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_sync=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn open_controller(config: Config, data_dir: &Path) -> Result<Controller> {
  let storage = SqliteStorage::open(data_dir)?;
  let queue = DeferredActionQueue::open(data_dir, config.queue.max_actions)?;
  let network = HttpNetwork::new()?;

  Ok(LifecycleController::new(config, storage, network, queue)?)
}

fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  headers: &[String],
  data: Option<String>,
  navigate: bool,
) -> Result<Request> {
  let url = config.resolve(url)?;
  let method: reqwest::Method = method
    .to_ascii_uppercase()
    .parse()
    .map_err(|_| eyre!("Invalid method: {}", method))?;

  let mut request = if navigate {
    if method != reqwest::Method::GET {
      return Err(eyre!("--navigate only applies to GET requests, got {}", method));
    }
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };

  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
    request = request.with_header(name.trim(), value.trim());
  }

  if let Some(data) = data {
    request = request.with_body(data);
  }

  Ok(request)
}

fn print_response(response: &Response) {
  println!("{}", response.status);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", String::from_utf8_lossy(&response.body));
}

fn print_reply(reply: &MessageReply) -> Result<()> {
  println!("{}", serde_json::to_string(reply)?);
  Ok(())
}

fn print_drain(report: &DrainReport) {
  if report.already_running {
    println!("drain already running");
  } else {
    println!(
      "replayed {}, {} still queued",
      report.replayed, report.remaining
    );
  }
}

fn print_status(controller: &Controller) -> Result<()> {
  println!("version: {}", controller.generations().version());
  println!("state:   {:?}", controller.state());

  let storage = controller.storage();
  println!("caches:");
  for generation in storage.generations()? {
    let handle = storage.open(&generation.name, generation.kind)?;
    println!(
      "  {:<40} {:<8} {:>6} entries  (created {})",
      generation.name,
      generation.kind.as_str(),
      storage.entry_count(&handle)?,
      generation.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }

  let pending = controller.queue().pending()?;
  println!("outbox:  {} pending", pending.len());
  for action in pending {
    println!(
      "  #{:<5} {:<6} {}  (queued {})",
      action.id,
      action.method.as_str(),
      action.url,
      action.enqueued_at.format("%Y-%m-%d %H:%M:%S")
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_navigate_rejects_other_methods() {
    let config = Config::default();
    let err = build_request(&config, "/chapters/1", "post", &[], None, true).unwrap_err();
    assert!(err.to_string().contains("--navigate"));

    let request = build_request(&config, "/chapters/1", "get", &[], None, true).unwrap();
    assert!(request.is_navigation());
  }

  #[test]
  fn test_headers_and_body() {
    let config = Config::default();
    let request = build_request(
      &config,
      "/api/learning/session",
      "POST",
      &["Content-Type: application/json".to_string()],
      Some("{}".to_string()),
      false,
    )
    .unwrap();

    assert_eq!(request.method, reqwest::Method::POST);
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.body.as_deref(), Some(b"{}".as_slice()));
    assert!(build_request(&config, "/x", "GET", &["no-colon".to_string()], None, false).is_err());
  }
}
