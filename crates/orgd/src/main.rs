//! OrgStore demo - replays paging, caching and association scenarios
//! against a seeded in-memory store

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orgcache::{CacheConfig, DataAccess};
use orgstore::{MemoryStore, Seed};
use tracing::info;

/// Fixture used when no `--seed` is given
const DEMO_SEED: &str = include_str!("../fixtures/demo.seed");

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed fixture to load instead of the built-in one
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// JSON cache configuration; replaces the cache flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared cache capacity (number of cached results)
    #[arg(short, long, default_value_t = 1024)]
    capacity: usize,

    /// Foreign keys per batched store call
    #[arg(short, long, default_value_t = 500)]
    batch_size: usize,

    /// Disable the cross-session cache
    #[arg(long)]
    no_shared_cache: bool,

    /// Disable the session cache
    #[arg(long)]
    no_session_cache: bool,

    /// Scenario to run (all of them by default)
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Page through users
    Page {
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page_num: u32,

        /// Rows per page
        #[arg(long, default_value_t = 5)]
        page_size: u32,
    },
    /// Repeat reads and show which tier answers them
    Cache,
    /// Resolve relations on demand, one by one and batched
    Lazy,
    /// Eager association reads for every relation
    Relations,
    /// Every scenario in turn
    All,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        match &self.config {
            Some(path) => CacheConfig::from_path(path)
                .with_context(|| format!("loading cache config {}", path.display())),
            None => {
                let config = CacheConfig::new()
                    .with_capacity(self.capacity)
                    .with_batch_size(self.batch_size)
                    .with_shared(!self.no_shared_cache)
                    .with_session(!self.no_session_cache);
                config.validate().context("invalid cache flags")?;
                Ok(config)
            }
        }
    }

    fn seed(&self) -> Result<Seed> {
        match &self.seed {
            Some(path) => {
                Seed::from_path(path).with_context(|| format!("loading seed {}", path.display()))
            }
            None => Seed::parse(DEMO_SEED).context("parsing built-in seed"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting orgd v{}", env!("CARGO_PKG_VERSION"));

    let config = args.cache_config()?;
    info!(
        capacity = config.capacity,
        batch_size = config.batch_size,
        shared = config.shared,
        session = config.session,
        "cache configured"
    );

    let seed = args.seed()?;
    let store = MemoryStore::from_seed(&seed).context("loading seed into store")?;
    let access = DataAccess::new(store, config)?;

    demo::run(&access, args.command.unwrap_or(Command::All))?;

    println!("\n=== Cache statistics ===");
    println!("{}", serde_json::to_string_pretty(&access.stats())?);
    println!("store calls: {}", access.pool().total_calls());

    Ok(())
}
