//! # alive
//!
//! Subscribes to Alive channels and prints every delivered event to stdout,
//! one JSON object per line. Logs go to stderr.

#![deny(unsafe_code)]

use std::io::Write as _;
use std::path::PathBuf;

use alive_client::{AliveClient, ClientOptions, Subscription, Topic};
use alive_core::SubscriberId;
use alive_core::logging::{init_json_subscriber, init_subscriber};
use alive_presence::{Metadata, MetadataUpdate, is_presence_channel};
use alive_settings::{load_settings_from_path, settings_path};
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

/// Alive subscription client.
#[derive(Parser, Debug)]
#[command(name = "alive", about = "Subscribe to Alive channels and print events")]
struct Cli {
    /// Signed socket URL.
    #[arg(long)]
    url: String,

    /// Endpoint handing out fresh socket URLs.
    #[arg(long)]
    refresh_url: String,

    /// Signed channel token, or `NAME=TOKEN`. Repeatable.
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,

    /// Presence metadata to publish on presence channels (JSON object or
    /// array of objects).
    #[arg(long)]
    metadata: Option<String>,

    /// Mark the session as shared between several views.
    #[arg(long)]
    shared: bool,

    /// Settings file (defaults to `~/.alive/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

/// Accept a signed token that names its channel, or an explicit `NAME=TOKEN`.
fn parse_topic(arg: &str) -> Result<Topic> {
    if let Some(topic) = Topic::from_signed(arg) {
        return Ok(topic);
    }
    match arg.split_once('=') {
        Some((name, signed)) if !name.is_empty() && !signed.is_empty() => {
            Ok(Topic::new(name, signed))
        }
        _ => bail!("cannot determine the channel of {arg:?}; pass it as NAME=TOKEN"),
    }
}

fn parse_metadata(arg: &str) -> Result<Vec<Metadata>> {
    let value: Value = serde_json::from_str(arg).context("metadata is not valid JSON")?;
    match value {
        Value::Object(entry) => Ok(vec![entry]),
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(entry) => Ok(entry),
                other => bail!("metadata entries must be objects, got {other}"),
            })
            .collect(),
        other => bail!("metadata must be an object or an array of objects, got {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    if settings.logging.json {
        init_json_subscriber(&level);
    } else {
        init_subscriber(&level);
    }

    let topics = args
        .channels
        .iter()
        .map(|arg| parse_topic(arg))
        .collect::<Result<Vec<_>>>()?;
    let metadata = args.metadata.as_deref().map(parse_metadata).transpose()?;

    let subscriber = SubscriberId::new();
    let (notifier, mut events) = mpsc::unbounded_channel();
    let options = ClientOptions::new(args.url, args.refresh_url)
        .shared(args.shared)
        .settings(settings);
    let client = AliveClient::connect(options, notifier);

    if let Some(metadata) = metadata {
        let updates = topics
            .iter()
            .filter(|topic| is_presence_channel(&topic.name))
            .map(|topic| MetadataUpdate {
                subscriber: subscriber.clone(),
                channel_name: topic.name.clone(),
                metadata: metadata.clone(),
            })
            .collect();
        client.update_presence_metadata(updates)?;
    }

    info!(channels = topics.len(), "subscribing");
    client.subscribe(
        topics
            .into_iter()
            .map(|topic| Subscription::new(subscriber.clone(), topic))
            .collect(),
    )?;

    let mut stdout = std::io::stdout().lock();
    loop {
        tokio::select! {
            Some((_, event)) = events.recv() => {
                serde_json::to_writer(&mut stdout, &event)?;
                writeln!(stdout)?;
                stdout.flush()?;
            }
            () = client.closed() => {
                info!("session ended");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutting down");
                let _ = client.shutdown();
                client.closed().await;
                break;
            }
        }
    }

    Ok(())
}
