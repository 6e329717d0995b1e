//! Usage Tracker CLI
//!
//! Records anonymous usage hits from the command line or from a stream of
//! input presses on stdin.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use usage_tracker::{
    config::Config,
    stats::create_shared_stats_with_persistence,
    tracker::{SessionOptions, Tracker, TrackerBuilder, NO_VALUE},
    PRIVACY_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "usage-tracker")]
#[command(version = VERSION)]
#[command(about = "Anonymous usage tracking over the measurement protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration and generate a client id
    Init {
        /// Tracking id of the destination property (e.g. UA-XXXX-Y)
        #[arg(long)]
        tracking_id: String,

        /// User language as an ISO 639-1 code
        #[arg(long)]
        language: Option<String>,

        /// Ask the collector to anonymize the sender IP
        #[arg(long)]
        anonymize_ip: bool,

        /// Document encoding
        #[arg(long)]
        encoding: Option<String>,

        /// Collection endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Send a single event
    Event {
        category: String,
        action: String,

        #[arg(long)]
        label: Option<String>,

        /// Event value (negative values are not sent)
        #[arg(long, default_value_t = NO_VALUE, allow_negative_numbers = true)]
        value: i64,
    },

    /// Send a single user timing
    Timing {
        category: String,
        variable: String,
        duration_ms: u64,

        /// Defaults to <category>.<variable>
        #[arg(long)]
        label: Option<String>,
    },

    /// Track one event per line read from stdin until EOF or Ctrl+C
    Watch {
        #[arg(long, default_value = "button")]
        category: String,

        #[arg(long, default_value = "press")]
        action: String,
    },

    /// Show configuration
    Config,

    /// Show delivery statistics
    Status,

    /// Display privacy declaration
    Privacy,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            tracking_id,
            language,
            anonymize_ip,
            encoding,
            endpoint,
        } => cmd_init(tracking_id, language, anonymize_ip, encoding, endpoint),
        Commands::Event {
            category,
            action,
            label,
            value,
        } => cmd_event(&category, &action, label.as_deref(), value),
        Commands::Timing {
            category,
            variable,
            duration_ms,
            label,
        } => cmd_timing(&category, &variable, duration_ms, label.as_deref()),
        Commands::Watch { category, action } => cmd_watch(&category, &action),
        Commands::Config => cmd_config(),
        Commands::Status => cmd_status(),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
    }
}

fn cmd_init(
    tracking_id: String,
    language: Option<String>,
    anonymize_ip: bool,
    encoding: Option<String>,
    endpoint: Option<String>,
) -> anyhow::Result<()> {
    if tracking_id.trim().is_empty() {
        bail!("Tracking id must not be empty");
    }

    // A broken config must not be replaced, or the stored client id is lost
    let mut config = Config::load()
        .with_context(|| format!("Error loading config from {:?}", Config::config_path()))?;
    let session = SessionOptions {
        language,
        anonymize_ip: anonymize_ip.then_some(true),
        encoding,
    };
    let client_id = config.reinitialize(tracking_id, session, endpoint);

    config.save().context("Error saving config")?;

    println!("Configuration written to {:?}", Config::config_path());
    println!("Client ID: {client_id}");
    Ok(())
}

fn cmd_event(category: &str, action: &str, label: Option<&str>, value: i64) -> anyhow::Result<()> {
    let (config, tracker) = start_tracker()?;
    tracker.track_event(category, action, label, value);
    finish(&config, tracker);
    Ok(())
}

fn cmd_timing(
    category: &str,
    variable: &str,
    duration_ms: u64,
    label: Option<&str>,
) -> anyhow::Result<()> {
    let (config, tracker) = start_tracker()?;
    tracker.track_user_timing(category, variable, duration_ms, label);
    finish(&config, tracker);
    Ok(())
}

fn cmd_watch(category: &str, action: &str) -> anyhow::Result<()> {
    let (config, tracker) = start_tracker()?;

    println!("Usage Tracker v{VERSION}");
    println!("Tracking id: {}", tracker.tracking_id());
    println!("Client id: {}", tracker.client_id());
    println!();
    println!("Enter one channel per line. Ctrl+C or EOF to stop.");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    // Stdin reads block, so they happen on their own thread
    let (sender, receiver) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                let channel = line.trim();
                if channel.is_empty() {
                    continue;
                }
                println!("{action} on channel {channel}");
                let label = format!("channel {channel}");
                tracker.track_event(category, action, Some(&label), NO_VALUE);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    finish(&config, tracker);
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("Error loading config")?;
    let json = serde_json::to_string_pretty(&config).context("Error serializing config")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{json}");
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("Error loading config")?;

    println!("Usage Tracker Status");
    println!("====================");
    println!();
    println!(
        "Tracking id: {}",
        config.tracking_id.as_deref().unwrap_or("(not configured)")
    );
    println!(
        "Client id: {}",
        config.client_id.as_deref().unwrap_or("(not generated)")
    );
    println!("Endpoint: {}", config.endpoint);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = create_shared_stats_with_persistence(stats_path);
        println!("{}", stats.summary());
    } else {
        println!("No previous delivery data found.");
    }
    Ok(())
}

/// Load the config and start a tracker with persisted stats.
fn start_tracker() -> anyhow::Result<(Config, Tracker)> {
    let mut config = Config::load().context("Error loading config")?;
    if config.tracking_id.is_none() {
        bail!("No tracking id configured. Run `usage-tracker init --tracking-id <ID>` first.");
    }

    let (_, generated) = config.ensure_client_id();
    if generated {
        if let Err(e) = config.save() {
            tracing::warn!("Could not persist client id: {}", e);
        }
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let tracker = TrackerBuilder::from_config(&config)
        .stats(stats)
        .build()
        .context("Error starting tracker")?;
    Ok((config, tracker))
}

/// Give queued hits a bounded chance to go out, then save stats.
fn finish(config: &Config, tracker: Tracker) {
    let pending = tracker.pending();
    if pending > 0 {
        tracing::info!("Delivering {} pending hit(s)...", pending);
    }
    if !tracker.flush(config.flush_budget(pending)) {
        tracing::warn!("Gave up waiting for {} hit(s)", tracker.pending());
    }

    let stats = tracker.stats().clone();
    if tracker.pending() == 0 {
        tracker.close();
    }
    // Otherwise the tracker is dropped and the worker is left to finish detached

    if let Err(e) = stats.save() {
        tracing::warn!("Could not save delivery stats: {}", e);
    }
    println!("{}", stats.summary());
}
