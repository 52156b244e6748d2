//! beacon - command-line client for an activity collector
//!
//! This tool provides commands for:
//! - Checking client configuration and the queued backlog
//! - Listing buckets and events on the collector
//! - Sending a heartbeat from the shell
//! - Delivering requests left in the overflow store
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queued requests: $XDG_DATA_HOME/beacon/queued/<client>.jsonl
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)
//! - Logs: $XDG_STATE_HOME/beacon/beacon.log.YYYY-MM-DD

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use beacon_core::{ActivityClient, Config, Event};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Send and inspect events on an activity collector")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file)
    #[arg(short, long)]
    verbose: bool,

    /// Talk to the testing collector instead of the production one
    #[arg(long)]
    testing: bool,

    /// Client name; selects the overflow store and tags created buckets
    #[arg(long, default_value = "beacon-cli")]
    client: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show client configuration and queued request count
    Status,

    /// List buckets on the collector
    Buckets,

    /// List events in a bucket
    Events {
        bucket: String,

        /// Maximum number of events to return
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Send one heartbeat event
    Heartbeat {
        bucket: String,

        /// Event type used if the bucket has to be created
        #[arg(long = "type", default_value = "heartbeat")]
        event_type: String,

        /// Merge window in seconds
        #[arg(long, default_value_t = 60.0)]
        pulsetime: f64,

        /// Event data as key=value; values are parsed as JSON when possible
        #[arg(long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        /// Seconds to wait for delivery before leaving the event queued
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Deliver requests waiting in the overflow store
    Flush {
        /// Seconds to wait for the backlog to drain
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

/// Returns $HOME or the current directory
fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Sets XDG environment variables to ensure the core library uses XDG paths
fn ensure_xdg_env() {
    let home = home_dir();

    if std::env::var("XDG_DATA_HOME").is_err() {
        std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
    }

    if std::env::var("XDG_STATE_HOME").is_err() {
        std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
    }

    if std::env::var("XDG_CONFIG_HOME").is_err() {
        std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(beacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let client = ActivityClient::new(config.client_config(&args.client, args.testing))
        .context("failed to create client")?;

    match args.command {
        Command::Status => cmd_status(&config, &client),
        Command::Buckets => cmd_buckets(&client).await,
        Command::Events { bucket, limit } => cmd_events(&client, &bucket, limit).await,
        Command::Heartbeat {
            bucket,
            event_type,
            pulsetime,
            data,
            timeout,
        } => {
            let data = parse_data(&data)?;
            cmd_heartbeat(&client, &bucket, &event_type, pulsetime, data, timeout).await
        }
        Command::Flush { timeout } => cmd_flush(&client, timeout).await,
    }
}

fn cmd_status(settings: &Config, client: &ActivityClient) -> Result<()> {
    let config = client.config();

    println!("Beacon Client Configuration");
    println!("===========================");
    println!();
    println!("Client:          {}", config.client_name);
    println!("Hostname:        {}", config.hostname);
    println!(
        "Server:          {}{}",
        config.server_url,
        if config.testing { " (testing)" } else { "" }
    );
    println!("Reconnect:       {}s", config.reconnect_interval.as_secs());
    println!("Timeout:         {}s", config.request_timeout.as_secs());
    println!("Commit interval: {}s", settings.client.commit_interval);
    println!();
    println!("Config file:     {}", Config::config_path().display());
    println!("Overflow store:  {}", config.overflow_path().display());
    println!("Log file:        {}", Config::log_path().display());
    println!("Log directory:   {}", Config::state_dir().display());
    println!();

    let queued = client
        .overflow_len()
        .context("failed to read overflow store")?;
    println!("Queued:          {}", queued);
    if queued > 0 {
        println!();
        println!("Run 'flush' to deliver queued requests.");
    }

    Ok(())
}

async fn cmd_buckets(client: &ActivityClient) -> Result<()> {
    let buckets = client
        .get_buckets()
        .await
        .with_context(|| format!("failed to list buckets on {}", client.config().server_url))?;

    if buckets.is_empty() {
        println!("No buckets found.");
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {:<24} {:<20}",
        "Bucket", "Type", "Client", "Hostname"
    );
    println!("{:-<104}", "");

    for bucket in buckets.values() {
        println!(
            "{:<40} {:<20} {:<24} {:<20}",
            bucket.id, bucket.event_type, bucket.client, bucket.hostname
        );
    }

    Ok(())
}

async fn cmd_events(client: &ActivityClient, bucket: &str, limit: Option<u32>) -> Result<()> {
    let events = client
        .get_events(bucket, limit)
        .await
        .with_context(|| format!("failed to list events in bucket {}", bucket))?;

    if events.is_empty() {
        println!("No events in {}.", bucket);
        return Ok(());
    }

    println!("{:<20} {:>10}  {}", "Timestamp", "Duration", "Data");
    println!("{:-<72}", "");

    for event in &events {
        println!(
            "{:<20} {:>9.1}s  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event.duration,
            serde_json::Value::Object(event.data.clone())
        );
    }

    Ok(())
}

async fn cmd_heartbeat(
    client: &ActivityClient,
    bucket: &str,
    event_type: &str,
    pulsetime: f64,
    data: serde_json::Map<String, serde_json::Value>,
    timeout: u64,
) -> Result<()> {
    client.setup_bucket(bucket, event_type);
    client.connect().context("failed to start dispatcher")?;

    client.heartbeat(bucket, &Event::new(chrono::Utc::now(), data), pulsetime);

    let delivered = client.flush(Duration::from_secs(timeout)).await;
    client.disconnect().await;

    if delivered {
        println!("Heartbeat delivered to {}", bucket);
    } else {
        println!("Collector unreachable; heartbeat queued for later delivery.");
    }

    Ok(())
}

async fn cmd_flush(client: &ActivityClient, timeout: u64) -> Result<()> {
    let queued = client
        .overflow_len()
        .context("failed to read overflow store")?;
    if queued == 0 {
        println!("No queued requests to flush.");
        return Ok(());
    }

    println!("Flushing {} queued request(s)...", queued);

    client.connect().context("failed to start dispatcher")?;
    let delivered = client.flush(Duration::from_secs(timeout)).await;
    client.disconnect().await;

    if !delivered {
        let remaining = client
            .overflow_len()
            .context("failed to read overflow store")?;
        bail!(
            "collector at {} unreachable, {} request(s) still queued",
            client.config().server_url,
            remaining
        );
    }

    println!("Flushed {} request(s)", queued);
    Ok(())
}

/// Parse `key=value` pairs into event data.
fn parse_data(pairs: &[String]) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut data = serde_json::Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid data '{}', expected KEY=VALUE", pair);
        };
        if key.is_empty() {
            bail!("invalid data '{}', key is empty", pair);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(data)
}
