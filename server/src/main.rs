use anyhow::{Context, Result};
use clap::Parser;
use shop_core::{SearchEngine, SnapshotStore};
use shop_indexer::{AppConfig, Scheduler};
use shop_server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "shop-server")]
#[command(about = "Catalog search HTTP server", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// sled store directory, overrides `store_path` from the config
    #[arg(long)]
    store: Option<PathBuf>,
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Run the feed scheduler inside the server process
    #[arg(long)]
    scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let mut engine = SearchEngine::new(config.engine.clone());
    if let Some(path) = args.store.as_deref().or(config.store_path.as_deref()) {
        let store = SnapshotStore::open(path).with_context(|| format!("opening store at {}", path.display()))?;
        engine = engine.with_store(store);
        let loaded = engine.reload()?;
        tracing::info!(projects = loaded, store = %path.display(), "store loaded");
    }
    let engine = Arc::new(engine);

    let scheduler = if args.scheduler {
        let scheduler = Scheduler::new(engine.clone(), &config.feed, config.scheduler.clone())?;
        let restored = scheduler.restore()?;
        for spec in &config.jobs {
            scheduler.register(spec).with_context(|| format!("registering job for {}", spec.project))?;
        }
        tracing::info!(restored, configured = config.jobs.len(), "feed scheduler starting");
        Some(scheduler)
    } else {
        None
    };
    let handle = scheduler.as_ref().map(|s| s.spawn());

    let state = AppState::new(engine, &config.feed, scheduler.clone())?;
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    if let Some(handle) = handle {
        handle.await?;
    }
    Ok(())
}
