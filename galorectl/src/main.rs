//! # Galorectl
//!
//! Operator tool for the Galore gallery cache. Loads the same configuration
//! the bot uses and either validates it (`check`), draws a one-off sample
//! (`sample`), or warms every gallery and serves picks typed on stdin until
//! interrupted (`run`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use galore_config::{ConfigSource, DeliveryMode, GaloreConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause between images in queued delivery.
const QUEUE_PAUSE: Duration = Duration::from_millis(500);

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "galorectl")]
#[command(about = "Gallery cache operator tool - check, sample, and serve Galore galleries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate configuration and refresh every gallery once
    Check,
    /// Refresh one gallery command and print a random sample
    Sample {
        /// Gallery command name
        command: String,
        /// How many images to draw (defaults to the configured count)
        count: Option<usize>,
    },
    /// Warm all galleries and serve picks read from stdin until interrupted
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, source) = GaloreConfig::load_from_env().context("failed to load configuration")?;
    log_config_source(&source);

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => run_check(config).await,
        Command::Sample { command, count } => run_sample(config, &command, count).await,
        Command::Run => run_serve(config).await,
    }
}

fn log_config_source(source: &ConfigSource) {
    match source {
        ConfigSource::Default => info!("using built-in default configuration"),
        ConfigSource::EnvPath(path) => {
            info!(path = %path.display(), "configuration loaded from env path")
        }
        ConfigSource::EnvInline => {
            info!("configuration loaded from inline environment json")
        }
        ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
    }
}

async fn run_check(config: GaloreConfig) -> anyhow::Result<()> {
    if config.commands.is_empty() {
        println!("no gallery commands configured");
        return Ok(());
    }

    let cache = config.build_cache();
    println!("root: {}", cache.root().display());

    let mut failures = 0usize;
    for name in cache.command_names() {
        match cache.refresh(&name).await {
            Ok(summary) => {
                println!(
                    "{name}: {} files across {} watched directories ({} ms)",
                    summary.files,
                    summary.watched_directories,
                    summary.elapsed.as_millis()
                );
            }
            Err(error) => {
                failures += 1;
                println!("{name}: {error}");
            }
        }
    }
    cache.dispose().await;

    if failures > 0 {
        anyhow::bail!("{failures} gallery command(s) failed to refresh");
    }
    Ok(())
}

async fn run_sample(
    config: GaloreConfig,
    command: &str,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let delivery = config.delivery;
    let cache = config.build_cache();
    let images = cache.pick(command, count).await?;
    deliver(&images, delivery).await;
    cache.dispose().await;
    Ok(())
}

async fn run_serve(config: GaloreConfig) -> anyhow::Result<()> {
    let delivery = config.delivery;
    let cache = config.build_cache();
    cache.ready().await;
    info!(
        commands = cache.command_names().len(),
        "galleries warmed, reading picks from stdin"
    );
    println!("enter: <command> [count]  (ctrl-c or EOF to exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match parse_request(&line) {
                            Some((name, count)) => match cache.pick(name, count).await {
                                Ok(images) => deliver(&images, delivery).await,
                                Err(error) => println!("{error}"),
                            },
                            None => {
                                if !line.trim().is_empty() {
                                    println!("usage: <command> [count]");
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "failed to read from stdin");
                        break;
                    }
                }
            }
        }
    }

    cache.dispose().await;
    Ok(())
}

async fn deliver(images: &[PathBuf], mode: DeliveryMode) {
    if images.is_empty() {
        println!("Sorry, no pictures today.");
        return;
    }
    match mode {
        DeliveryMode::Immediate => {
            for image in images {
                println!("{}", image.display());
            }
        }
        DeliveryMode::Queued => {
            for (index, image) in images.iter().enumerate() {
                if index > 0 {
                    sleep(QUEUE_PAUSE).await;
                }
                println!("{}", image.display());
            }
        }
    }
}

/// Parses a `<command> [count]` request line. Lines with a malformed count
/// or trailing junk are rejected.
fn parse_request(line: &str) -> Option<(&str, Option<usize>)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let count = match parts.next() {
        None => None,
        Some(raw) => Some(raw.parse().ok()?),
    };
    if parts.next().is_some() {
        return None;
    }
    Some((name, count))
}
