use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use umami_telemetry::{TrackPayload, TrackerError, UmamiClient};

/// How long queued events may take to go out before the process exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "umami", version, about = "Send events to an Umami collector")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track a pageview, or an event when --name is given
    Track {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Event data in key=value format (can be specified multiple times)
        #[arg(long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,
    },
    /// Track a screen view
    Screen {
        name: String,
    },
    /// Show configuration and identifiers
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("UMAMI_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = UmamiClient::from_env()?;

    match cli.cmd {
        Command::Track {
            name,
            url,
            title,
            data,
        } => {
            let payload = TrackPayload {
                name,
                url,
                title,
                data: parse_data(&data)?,
                ..TrackPayload::default()
            };
            client.track(payload).await.map_err(not_initialized_hint)?;
            finish(&client).await;
        }
        Command::Screen { name } => {
            client.track_screen(&name).await.map_err(not_initialized_hint)?;
            finish(&client).await;
        }
        Command::Status { json } => print_status(&client, json).await?,
    }
    Ok(())
}

/// Parse `key=value` pairs; values that parse as JSON keep their type
fn parse_data(pairs: &[String]) -> Result<Option<Map<String, Value>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut data = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid --data '{}': expected KEY=VALUE", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(Some(data))
}

fn not_initialized_hint(e: TrackerError) -> anyhow::Error {
    let hint = matches!(e, TrackerError::NotInitialized);
    let err = anyhow::Error::new(e);
    if hint {
        err.context("Set UMAMI_WEBSITE_ID and UMAMI_HOST_URL, or [umami] in .umami/config.toml")
    } else {
        err
    }
}

async fn finish(client: &UmamiClient) {
    if !client.drain(DRAIN_TIMEOUT).await {
        eprintln!(
            "warning: {} event(s) still queued, giving up",
            client.status().pending
        );
    }
}

async fn print_status(client: &UmamiClient, as_json: bool) -> Result<()> {
    let config = client.config();
    let status = json!({
        "initialized": client.is_initialized(),
        "enabled": config.enabled,
        "debug": config.debug,
        "website_id": config.website_id,
        "host_url": config.host_url,
        "batching": config.batching.enabled,
        "anonymous_id": client.anonymous_id().await,
        "session_id": client.session_id().await,
    });

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to encode status")?
        );
        return Ok(());
    }

    println!("initialized: {}", client.is_initialized());
    println!("enabled:     {}", config.enabled);
    println!("debug:       {}", config.debug);
    println!(
        "host:        {}",
        config.host_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "website:     {}",
        config.website_id.as_deref().unwrap_or("(not set)")
    );
    println!("batching:    {}", config.batching.enabled);
    println!("anonymous:   {}", status["anonymous_id"].as_str().unwrap_or_default());
    println!("session:     {}", status["session_id"].as_str().unwrap_or_default());
    Ok(())
}
