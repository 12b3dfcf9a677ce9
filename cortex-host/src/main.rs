//! Composition root: loads configuration, builds the durable stores, wires
//! the Cortex <-> Router bridge callbacks and runs both loops side by side.

mod adapter;
mod bridge;
mod config;
mod stubs;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cortex_core::config::GlobalConfig;
use cortex_core::traits::Store;
use cortex_engine::adapters::AdapterRegistry;
use cortex_engine::{Cortex, Gardener, NoopHooks, OutputRouter};
use cortex_memory::Hippocampus;
use cortex_storage::connection::ConnectionConfig;
use cortex_storage::pool::ConnectionPool;
use cortex_storage::surreal::SurrealStore;
use router::{Router, RouterConfig as RouterRuntimeConfig, RouterStore};
use tracing::info;

use adapter::StdoutAdapter;
use bridge::{CortexNotifier, RouterSpawner};
use stubs::{EchoExecutor, EchoLlmCaller, FixedScoreModel, HashEmbedder, NoopExtractor, TruncatingSummarizer};

#[derive(Parser)]
#[command(name = "cortex-host")]
#[command(about = "Runs a Cortex agent and its Router side by side", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (defaults to $HOME/.cortex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Cortex loop and the Router until interrupted (Ctrl-C).
    Run,
    /// Print durable store and router statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let global_config = match &cli.config {
        Some(path) => GlobalConfig::load_from_path(path).await?,
        None => GlobalConfig::load_or_create_default().await?,
    };

    match cli.command {
        Commands::Run => run(global_config).await,
        Commands::Stats => stats(global_config).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "cortex_host=debug,cortex_engine=debug,router=debug,cortex_storage=debug" } else { "cortex_host=info,cortex_engine=info,router=info" };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Two sibling files under the same data directory: the embedded
/// `surrealkv` engine locks its path for the life of the connection, so
/// Cortex and Router each need their own.
fn router_db_path(cortex_db_path: &std::path::Path) -> PathBuf {
    let stem = cortex_db_path.file_stem().and_then(|s| s.to_str()).unwrap_or("cortex");
    let extension = cortex_db_path.extension().and_then(|s| s.to_str()).unwrap_or("db");
    cortex_db_path.with_file_name(format!("{stem}-router.{extension}"))
}

async fn build_stores(global: &GlobalConfig) -> Result<(Arc<SurrealStore>, Arc<router::store::SurrealRouterStore>)> {
    let cortex_conn = ConnectionConfig::surrealkv(global.cortex.db_path.clone()).with_namespace("cortex".into()).with_database("main".into());
    let cortex_pool = Arc::new(ConnectionPool::new(cortex_conn));
    cortex_pool.initialize().await?;
    let store = Arc::new(SurrealStore::with_schema(cortex_pool, global.cortex.hippocampus_enabled).await?);

    let router_conn = ConnectionConfig::surrealkv(router_db_path(&global.cortex.db_path)).with_namespace("router".into()).with_database("main".into());
    let router_pool = Arc::new(ConnectionPool::new(router_conn));
    router_pool.initialize().await?;
    let router_store = Arc::new(router::store::SurrealRouterStore::with_schema(router_pool).await?);

    Ok((store, router_store))
}

async fn run(global: GlobalConfig) -> Result<()> {
    let (store, router_store) = build_stores(&global).await?;

    let registry = AdapterRegistry::new();
    registry.register(Arc::new(StdoutAdapter::new("cli")));
    let registry = Arc::new(registry);
    let output_router = OutputRouter::new(registry);

    let spawner = Arc::new(RouterSpawner::new(router_store.clone(), global.session_key()));
    let cortex_config = config::cortex_runtime_config(&global);

    let hippocampus = if global.cortex.hippocampus_enabled {
        Some(Arc::new(Hippocampus::new(store.clone(), Arc::new(HashEmbedder))))
    } else {
        None
    };

    let cortex = Arc::new(Cortex::new(
        store.clone(),
        cortex_config,
        hippocampus.clone(),
        output_router,
        Arc::new(EchoLlmCaller),
        spawner,
        Arc::new(NoopHooks),
    ));

    let gardener = Gardener::new(store.clone(), hippocampus, Arc::new(NoopExtractor), Arc::new(TruncatingSummarizer { max_chars: 4000 }));

    let on_delivered = Arc::new(CortexNotifier::new(store.clone()));
    let router_config: RouterRuntimeConfig = config::router_runtime_config(&global);
    let evaluator = Arc::new(router::Evaluator::new(
        Arc::new(FixedScoreModel(global.router.evaluator.fallback_weight as f64)),
        Arc::new(FixedScoreModel(global.router.evaluator.fallback_weight as f64)),
        config::router_evaluator_config(&global),
    ));
    let router = Arc::new(Router::new(
        router_store.clone(),
        router_config,
        evaluator,
        Arc::new(EchoExecutor),
        Arc::new(router::NoJobContext),
        Some(on_delivered),
    ));

    let reset = cortex.recover().await?;
    if reset > 0 {
        info!(reset, "reset stalled envelopes from a prior run");
    }
    router.recover().await?;

    info!(agent_id = %global.cortex.agent_id, "cortex-host starting");

    let cortex_handle = {
        let cortex = cortex.clone();
        tokio::spawn(async move { cortex.run().await })
    };
    let router_handle = {
        let router = router.clone();
        tokio::spawn(async move { router.run().await })
    };
    let gardener_handle = tokio::spawn(async move { run_gardener_loop(gardener).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cortex.stop();
    router.stop();
    gardener_handle.abort();

    let _ = cortex_handle.await;
    let _ = router_handle.await;
    Ok(())
}

async fn run_gardener_loop<S: Store>(gardener: Gardener<S>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let report = gardener.run_once().await;
        if !report.fact_extractor.errors.is_empty() || !report.op_harvester.errors.is_empty() {
            tracing::warn!(?report, "gardener reported errors this pass");
        }
    }
}

async fn stats(global: GlobalConfig) -> Result<()> {
    let (store, router_store) = build_stores(&global).await?;

    let store_stats = store.stats().await?;
    println!("Cortex store statistics");
    println!("=======================");
    println!("Pending envelopes:    {}", store_stats.pending_envelopes);
    println!("Processing envelopes: {}", store_stats.processing_envelopes);
    println!("Session messages:     {}", store_stats.session_messages);
    println!("Open pending ops:     {}", store_stats.open_pending_ops);
    println!("Hot facts:            {}", store_stats.hot_facts);
    println!("Cold facts:           {}", store_stats.cold_facts);

    let in_execution = router_store.list_in_execution().await?;
    println!();
    println!("Router statistics");
    println!("=================");
    println!("Jobs in execution:    {}", in_execution.len());

    Ok(())
}
