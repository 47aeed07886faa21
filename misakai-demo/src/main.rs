mod actor;
mod config;
mod store;

use actor::ActorProvider;
use anyhow::{Context, Result};
use clap::Parser;
use config::{DemoConfig, LoggingConfig};
use misakai_storage::{ExpectedExt, FaultSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::InMemoryStore;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "misakai-demo")]
#[command(about = "Actor lookups through the Misakai entity cache", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Actor to load and edit
    #[arg(short, long, default_value_t = 7)]
    key: u64,

    /// OAuth identity to resolve, as `provider:id`
    #[arg(long, default_value = "github:1007")]
    oauth: String,

    /// Number of actors in the in-memory store
    #[arg(long, default_value_t = 10)]
    actors: u64,

    /// Simulated backing-store latency
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Override the cache capacity from the configuration
    #[arg(long)]
    capacity: Option<usize>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DemoConfig::from_file(path)?,
        None => DemoConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.cache.capacity = capacity;
    }

    init_tracing(&config.logging);
    info!("Starting Misakai demo v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(InMemoryStore::seeded(
        args.actors,
        Duration::from_millis(args.latency_ms),
    ));
    info!("Backing store holds {} actors", store.len());

    let sink = FaultSink::new();
    sink.subscribe(|fault| error!("Storage fault: {}", fault));

    let actors = ActorProvider::new(store.clone(), config.cache.clone(), sink)?;
    let sweeper = actors.start_sweeper()?;

    // Lookups block on the store, keep them off the async workers
    let provider = actors.clone();
    tokio::task::spawn_blocking(move || run(&provider, &store, &args))
        .await
        .context("demo task panicked")??;

    let stats = actors.cache().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}

fn run(actors: &ActorProvider, store: &InMemoryStore, args: &Args) -> Result<()> {
    match actors.get_by_key(args.key)? {
        Some(actor) => {
            info!("Loaded actor {} ({})", actor.name, actor.email);
            actor.set_bio("Hello");
            store.save(&actor);
        }
        None => warn!("Actor {} not found", args.key),
    }

    // Second lookup is served from the cache and sees the edit
    let again = actors
        .get_by_key(args.key)
        .require(format!("actor {}", args.key));
    match again {
        Ok(actor) => info!(
            "Actor {} bio is now {:?} (created {})",
            args.key,
            actor.bio(),
            actor.created_at.format("%Y-%m-%d")
        ),
        Err(err) => warn!("{}", err),
    }

    let (provider, id) = args
        .oauth
        .split_once(':')
        .with_context(|| format!("OAuth identity '{}' is not provider:id", args.oauth))?;
    match actors.from_oauth(provider, id)? {
        Some(actor) => info!(
            "OAuth {} resolves to actor {} ({})",
            args.oauth,
            actor.name,
            serde_json::to_string(&actor.to_row())?
        ),
        None => info!("No actor registered for OAuth {}", args.oauth),
    }

    let linked = actors.get_many_by_tag(&args.oauth)?;
    info!("{} actors linked to {}", linked.len(), args.oauth);

    let batch: Vec<u64> = (1..=args.actors.min(5)).collect();
    let found = actors.get_many_by_key(&batch)?;
    info!("Batch lookup found {} of {} actors", found.len(), batch.len());

    Ok(())
}
