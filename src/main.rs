use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use search_index_sync::config::{AppConfig, CliConfig, FileConfig};
use search_index_sync::jobs::{JobContext, JobQueue};
use search_index_sync::metrics;
use search_index_sync::model::TypeLabel;
use search_index_sync::propagation::{enqueue_rebuild, propagation_jobs, CommitDeferredDispatcher};
use search_index_sync::registry::{IndexRegistry, ModelTypes};
use search_index_sync::search::Fts5SearchIndex;
use search_index_sync::store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(name = "index-sync", about = "Search index maintenance")]
struct CliArgs {
    /// Directory holding store.db and index.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values there override command line options.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Number of jobs executed concurrently.
    #[clap(long)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-index every stored entity of every document type.
    Rebuild,

    /// Query the search index.
    Search {
        query: String,

        #[clap(long, default_value_t = 20)]
        limit: usize,

        /// Only return documents of this type, e.g. blog.Article
        #[clap(long = "type")]
        type_label: Option<TypeLabel>,
    },

    /// Print index statistics.
    Stats,
}

struct App {
    config: AppConfig,
    store: SqliteStore,
    index: Arc<Fts5SearchIndex>,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        info!("Opening store at {:?}...", config.store_db_path());
        let store = SqliteStore::new(config.store_db_path(), config.job_queue.workers)?;
        info!("Opening search index at {:?}...", config.index_db_path());
        let index = Arc::new(Fts5SearchIndex::new(&config.index_db_path())?);
        Ok(Self {
            config,
            store,
            index,
        })
    }

    fn registry(&self) -> Arc<IndexRegistry> {
        Arc::new(IndexRegistry::new(
            self.config.index.documents.clone(),
            Arc::new(self.store.clone()),
            Arc::clone(&self.index),
        ))
    }
}

async fn rebuild(app: App) -> Result<()> {
    let registry = app.registry();
    let shutdown = CancellationToken::new();
    let context = JobContext::new(
        shutdown.clone(),
        registry.clone(),
        Arc::new(ModelTypes::new(app.config.known_types())),
        Arc::new(app.store.clone()),
    );
    let (queue, worker) = JobQueue::new(propagation_jobs(), context, &app.config.job_queue);
    let worker_handle = tokio::spawn(worker.run());

    let start = Instant::now();
    app.index.clear()?;
    let dispatcher = CommitDeferredDispatcher::new(Arc::new(queue.clone()));
    let enqueued = enqueue_rebuild(&app.store, registry.document_types(), &dispatcher)?;
    info!("Enqueued {} jobs, waiting for the queue to drain", enqueued);

    queue.wait_idle().await;
    shutdown.cancel();
    worker_handle.await.context("Job worker task failed")?;

    let stats = app.index.stats()?;
    info!(
        "Rebuilt {} documents in {:?}",
        stats.documents,
        start.elapsed()
    );
    Ok(())
}

fn search(app: &App, query: &str, limit: usize, type_label: Option<&TypeLabel>) -> Result<()> {
    let hits = app.index.search(query, limit, type_label)?;
    if hits.is_empty() {
        println!("No results for {:?}", query);
        return Ok(());
    }
    for hit in hits {
        println!("{:>8.3}  {}", hit.score, hit.entity);
    }
    Ok(())
}

fn stats(app: &App) -> Result<()> {
    let stats = app.index.stats()?;
    println!("documents: {}", stats.documents);
    for (type_label, count) in &stats.by_type {
        println!("  {}: {}", type_label, count);
    }
    print!("{}", metrics::encode_metrics()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        workers: cli_args.workers,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();
    let app = App::open(config)?;

    match cli_args.command {
        Command::Rebuild => rebuild(app).await,
        Command::Search {
            query,
            limit,
            type_label,
        } => search(&app, &query, limit, type_label.as_ref()),
        Command::Stats => stats(&app),
    }
}
