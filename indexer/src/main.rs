use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shop_core::{SearchEngine, SnapshotStore};
use shop_indexer::{
    AppConfig, DeltaFeedProcessor, Downloader, FeedFormat, FeedJob, FeedSource, FullFeedProcessor, Scheduler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "shop-indexer")]
#[command(about = "Load catalog feeds into the search index and keep them fresh", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// sled store directory, overrides `store_path` from the config
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild a project's index from a full feed
    Full {
        #[arg(long)]
        project: String,
        /// URL, file:// URL or path
        #[arg(long)]
        source: String,
        #[arg(long)]
        format: String,
    },
    /// Apply a price/stock delta feed to a project
    Delta {
        #[arg(long)]
        project: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        format: String,
    },
    /// Index every feed file under a directory; each file's stem names its project
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Run the feed scheduler with the configured and persisted jobs until interrupted
    Run,
    /// Print persisted feed job status as JSON
    Jobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let engine = Arc::new(open_engine(&config, cli.store.as_deref())?);

    match cli.command {
        Commands::Full { project, source, format } => {
            let processor = FullFeedProcessor::new(engine, Arc::new(Downloader::new(&config.feed)?), &config.feed);
            let report = processor.process(&project, &source.parse()?, format.parse()?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Delta { project, source, format } => {
            let processor = DeltaFeedProcessor::new(engine, Arc::new(Downloader::new(&config.feed)?), &config.feed);
            let report = processor.process(&project, &source.parse()?, format.parse()?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Import { dir } => import_dir(engine, &config, &dir).await?,
        Commands::Run => run_scheduler(engine, &config).await?,
        Commands::Jobs => {
            let Some(store) = engine.store() else { bail!("no store configured; pass --store") };
            let jobs: Vec<FeedJob> = store.load_jobs()?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
    }
    Ok(())
}

fn open_engine(config: &AppConfig, store_override: Option<&Path>) -> Result<SearchEngine> {
    let engine = SearchEngine::new(config.engine.clone());
    let Some(path) = store_override.or(config.store_path.as_deref()) else { return Ok(engine) };
    let store = SnapshotStore::open(path).with_context(|| format!("opening store at {}", path.display()))?;
    let engine = engine.with_store(store);
    let loaded = engine.reload()?;
    tracing::info!(projects = loaded, store = %path.display(), "store loaded");
    Ok(engine)
}

async fn import_dir(engine: Arc<SearchEngine>, config: &AppConfig, dir: &Path) -> Result<()> {
    let processor = FullFeedProcessor::new(engine, Arc::new(Downloader::new(&config.feed)?), &config.feed);
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let format = path.extension().and_then(|s| s.to_str()).and_then(FeedFormat::from_extension);
        let project = path.file_stem().and_then(|s| s.to_str());
        if let (Some(format), Some(project)) = (format, project) {
            files.push((project.to_string(), path.to_path_buf(), format));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));

    let mut failed = 0;
    for (project, path, format) in files {
        match processor.process(&project, &FeedSource::File(path.clone()), format).await {
            Ok(report) => tracing::info!(project = %project, items = report.items_indexed, rejected = report.items_rejected, "imported"),
            Err(err) => {
                failed += 1;
                tracing::error!(project = %project, path = %path.display(), error = %err, "import failed");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} feed(s) failed to import");
    }
    Ok(())
}

async fn run_scheduler(engine: Arc<SearchEngine>, config: &AppConfig) -> Result<()> {
    let scheduler = Scheduler::new(engine, &config.feed, config.scheduler.clone())?;
    let restored = scheduler.restore()?;
    for spec in &config.jobs {
        let job = scheduler.register(spec).with_context(|| format!("registering job for {}", spec.project))?;
        tracing::info!(job = %job.id, "registered from config");
    }
    tracing::info!(restored, configured = config.jobs.len(), "feed jobs loaded");

    let handle = scheduler.spawn();
    tokio::signal::ctrl_c().await?;
    scheduler.shutdown();
    handle.await?;
    Ok(())
}
