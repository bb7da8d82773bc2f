//! webapi-crawl main entry point
//!
//! Command-line interface for crawling the preprint index into a sharded
//! content store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use webapi_crawl::checkpoint::{CheckpointStore, SqliteCheckpoint};
use webapi_crawl::config::{load_config_with_hash, Config};
use webapi_crawl::content::{read_type, CrawledObject, FsStore, Sharder};
use webapi_crawl::preprints;
use webapi_crawl::session::{ObjectSink, WindowConfig, WindowedCrawl};

/// webapi-crawl: resumable crawls of paginated, rate-limited APIs
///
/// Downloads every preprint listed by the configured index within the
/// configured date window. Interrupted crawls resume from the last
/// checkpoint.
#[derive(Parser, Debug)]
#[command(name = "webapi-crawl")]
#[command(version)]
#[command(about = "Resumable crawls of paginated HTTP APIs", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the configured window, resuming saved progress
    Crawl {
        /// Discard saved progress and start from the beginning of the window
        #[arg(long)]
        restart: bool,
    },
    /// List the type tag and name of every downloaded object
    Scan,
    /// Print stored objects by key
    Lookup {
        #[arg(value_name = "KEY", required = true)]
        keys: Vec<String>,
    },
    /// Print the latest checkpoint record
    Checkpoint,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Crawl { restart } => handle_crawl(config, restart).await?,
        Command::Scan => handle_scan(&config).await?,
        Command::Lookup { keys } => handle_lookup(&config, &keys).await?,
        Command::Checkpoint => handle_checkpoint(&config).await?,
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("webapi_crawl=info,warn"),
            1 => EnvFilter::new("webapi_crawl=debug,info"),
            2 => EnvFilter::new("webapi_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn downloads(config: &Config) -> Arc<FsStore> {
    Arc::new(FsStore::new(&config.cache.downloads))
}

/// Handles the crawl command
async fn handle_crawl(config: Config, restart: bool) -> anyhow::Result<()> {
    if restart {
        tracing::info!("Starting fresh crawl (discarding saved progress)");
    } else {
        tracing::info!("Starting crawl (will resume saved progress)");
    }

    let store = downloads(&config);
    store.prepare().await?;
    let checkpoints = Arc::new(
        SqliteCheckpoint::new(Path::new(&config.cache.checkpoint))
            .with_context(|| format!("opening checkpoint log {}", config.cache.checkpoint))?,
    );
    let sink = ObjectSink::new(store, Sharder::new(config.cache.sharding_prefix_len));
    let session = WindowedCrawl::new(checkpoints, sink);

    let opts = preprints::endpoint_options(&config)?;
    let window = WindowConfig {
        from: config.service.start_date,
        to: config.service.end_date,
        restart,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping crawl");
            on_signal.cancel();
        }
    });

    let service_url = config.service.service_url.clone();
    let result = session
        .run(&cancel, &window, |state| {
            preprints::new_crawler(&service_url, state, opts)
        })
        .await;

    match result {
        Ok(summary) => {
            tracing::info!(
                "Crawl completed: {} objects written, {} failed, cursor {} of {}",
                summary.saved.total_written(),
                summary.saved.total_failed(),
                summary.state.cursor,
                summary.state.total
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            tracing::warn!("Crawl cancelled; progress is saved");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the scan command
async fn handle_scan(config: &Config) -> anyhow::Result<()> {
    let store = downloads(config);
    let mut count = 0u64;
    for shard in store.shards().await? {
        for name in store.list(&shard).await? {
            let buf = store.read(&shard, &name).await?;
            match read_type(&buf) {
                Ok(content_type) => {
                    println!("{}\t{}/{}", content_type, shard, name);
                    count += 1;
                }
                Err(e) => tracing::warn!("Skipping {}/{}: {}", shard, name, e),
            }
        }
    }
    tracing::info!("{} objects", count);
    Ok(())
}

/// Handles the lookup command
async fn handle_lookup(config: &Config, keys: &[String]) -> anyhow::Result<()> {
    let store = downloads(config);
    let sharder = Sharder::new(config.cache.sharding_prefix_len);
    for key in keys {
        let (prefix, suffix) = sharder.assign(key);
        let obj = CrawledObject::<Value>::load(&store, &prefix, &suffix)
            .await
            .with_context(|| format!("looking up {}", key))?;
        println!("{}", serde_json::to_string_pretty(&obj.value)?);
    }
    Ok(())
}

/// Handles the checkpoint command
async fn handle_checkpoint(config: &Config) -> anyhow::Result<()> {
    let checkpoints = SqliteCheckpoint::new(Path::new(&config.cache.checkpoint))
        .with_context(|| format!("opening checkpoint log {}", config.cache.checkpoint))?;
    let latest = checkpoints.latest().await?;
    if latest.is_empty() {
        println!("no checkpoint");
    } else {
        println!("{}", String::from_utf8_lossy(&latest));
    }
    Ok(())
}
