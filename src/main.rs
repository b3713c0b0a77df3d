//! # Image Cache Maintenance Tool
//!
//! ## Purpose
//! Command line entry point for inspecting and maintaining the image cache
//! outside the desktop application: resolving identifiers, clearing the
//! directory, sweeping expired entries, and printing statistics.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration file, command line arguments, environment
//! - **Output**: Resolved handles and cache statistics on stdout
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Construct the cache manager (directory creation + startup sweep)
//! 4. Run the requested subcommand
//! 5. Shut the worker pool down gracefully

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use recipe_image_cache::{
    config::Config,
    errors::{CacheError, Result},
    CacheManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("image-cache-tool")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Meal Planner Team")
        .about("Inspect and maintain the recipe image cache")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("image-cache.toml"),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve one or more image identifiers through the cache")
                .arg(
                    Arg::new("identifier")
                        .value_name("IDENTIFIER")
                        .help("Image URL or bundled resource path")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(Command::new("clear").about("Delete every cache entry"))
        .subcommand(Command::new("sweep").about("Delete expired entries and enforce the entry limit"))
        .subcommand(
            Command::new("stats").about("Print cache statistics").arg(
                Arg::new("json")
                    .long("json")
                    .help("Emit statistics as JSON")
                    .action(ArgAction::SetTrue),
            ),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("image-cache.toml");
    let config = Config::from_file(config_path)?;

    init_logging(&config)?;
    info!("Configuration loaded from: {}", config_path);

    let manager = CacheManager::new(&config)?;

    match matches.subcommand() {
        Some(("resolve", sub)) => run_resolve(&manager, sub).await,
        Some(("clear", _)) => {
            manager.clear_cache();
            println!("Cache cleared");
        }
        Some(("sweep", _)) => {
            let removed = manager.sweep();
            let stats = manager.stats();
            println!(
                "Swept {} expired entries; {} remain ({} bytes)",
                removed, stats.entry_count, stats.total_size_bytes
            );
        }
        Some(("stats", sub)) => print_stats(&manager, sub)?,
        _ => {
            let stats = manager.stats();
            println!(
                "{} entries, {} bytes (run with --help for subcommands)",
                stats.entry_count, stats.total_size_bytes
            );
        }
    }

    // Lets any background downloads started by `resolve` finish within the
    // configured grace period
    manager.shutdown().await;
    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .map_err(|_| CacheError::Config {
            message: format!("Invalid log level: {}", config.logging.level),
        })?;

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .with_filter(filter),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(filter),
            )
            .init();
    }

    Ok(())
}

/// Resolve each identifier and report what the consumer would load
async fn run_resolve(manager: &CacheManager, matches: &ArgMatches) {
    let identifiers: Vec<&String> = matches
        .get_many::<String>("identifier")
        .map(|values| values.collect())
        .unwrap_or_default();

    for identifier in identifiers {
        let handle = manager.resolve(identifier).await;
        let kind = if handle.is_cached() { "cached" } else { "direct" };
        println!("{}  [{}] {}", identifier, kind, handle.location());
    }
}

/// Print cache statistics, optionally as JSON
fn print_stats(manager: &CacheManager, matches: &ArgMatches) -> Result<()> {
    let stats = manager.stats();

    if matches.get_flag("json") {
        let rendered = serde_json::to_string_pretty(&stats).map_err(|e| CacheError::Config {
            message: format!("Failed to serialize stats: {}", e),
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("Entries:      {}", stats.entry_count);
    println!("Total bytes:  {}", stats.total_size_bytes);
    if let Some(oldest) = stats.oldest_entry {
        println!("Oldest entry: {}", oldest);
    }
    if let Some(newest) = stats.newest_entry {
        println!("Newest entry: {}", newest);
    }
    println!(
        "Hits: {}  Misses: {}  Downloads: {}  Failures: {}",
        stats.counters.hits, stats.counters.misses, stats.counters.completed, stats.counters.failed
    );

    Ok(())
}
