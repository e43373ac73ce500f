//! `sitesearchd`: the single-binary daemon wiring every component together
//! (§6 "Deployment topology" — one process hosting the shared worker pools,
//! per-task crawlers, and the scheduler loop).

use clap::{Parser, Subcommand};
use sitesearch_broker::QueueBroker;
use sitesearch_clean::converter::HttpDocumentConverter;
use sitesearch_common::config::SystemConfig;
use sitesearch_crawler::firecrawl::{FirecrawlClient, HttpFirecrawlClient};
use sitesearch_index::{HttpEmbeddingClient, HttpRerankClient, Indexer, IndexerConfig, NoopRerankClient, RerankClient};
use sitesearch_manager::PipelineManager;
use sitesearch_scheduler::Scheduler;
use sitesearch_storage::Storage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "sitesearchd")]
#[command(about = "SiteSearch crawl-clean-store-index daemon")]
struct Cli {
    /// Path to the system TOML config (overridable per field via
    /// SITESEARCH_* environment variables, §6).
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run database migrations and exit.
    Migrate,
    /// Run the full pipeline: shared worker pools, completion monitor, and
    /// scheduler loop, until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = SystemConfig::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %cli.config, "could not load config file, using defaults");
        SystemConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => migrate(&config).await,
        Command::Serve => serve(&config).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitesearch=info,sitesearchd=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn migrate(config: &SystemConfig) -> anyhow::Result<()> {
    let storage = Storage::connect(&config.storage.database_url).await?;
    storage.migrate().await?;
    info!("migrations applied");
    Ok(())
}

async fn serve(config: &SystemConfig) -> anyhow::Result<()> {
    let broker = QueueBroker::connect(&config.storage.redis_url).await?;
    let storage = Storage::connect(&config.storage.database_url).await?;
    storage.migrate().await?;

    let qdrant = qdrant_client::Qdrant::from_url(&config.storage.qdrant_url)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build qdrant client: {e}"))?;

    let embedder = Arc::new(HttpEmbeddingClient::new(config.indexing.embedding_url.clone()));
    let reranker: Arc<dyn RerankClient> = match &config.indexing.reranker_url {
        Some(url) => Arc::new(HttpRerankClient::new(url.clone())),
        None => Arc::new(NoopRerankClient),
    };
    let indexer_config = IndexerConfig {
        dense_dim: config.indexing.vector_dimension,
        chunk_size: config.indexing.chunk_size,
        chunk_overlap: config.indexing.chunk_overlap,
        default_top_k: config.indexing.default_top_k,
        rerank_top_k: config.indexing.rerank_top_k,
        similarity_cutoff: config.indexing.retrieval.similarity_cutoff,
    };
    let indexer = Arc::new(Indexer::new(qdrant, broker.clone(), embedder, reranker, indexer_config));

    let converter = Arc::new(HttpDocumentConverter::new(config.indexing.converter_url.clone()));

    let firecrawl: Option<Arc<dyn FirecrawlClient>> = config
        .firecrawl
        .as_ref()
        .map(|f| Arc::new(HttpFirecrawlClient::new(f.base_url.clone(), f.api_key.clone())) as Arc<dyn FirecrawlClient>);

    let manager = Arc::new(PipelineManager::new(
        broker.clone(),
        storage.clone(),
        indexer,
        converter,
        firecrawl,
        config.crawler.clone(),
        config.workers.clone(),
    ));

    manager.start_shared_pools().await;
    manager.start_monitoring().await;
    info!("shared worker pools and completion monitor started");

    let scheduler = Scheduler::new(storage, broker, manager.clone(), config.scheduler.poll_interval_secs);
    let scheduler_cancel = CancellationToken::new();
    let scheduler_handle = tokio::spawn({
        let cancel = scheduler_cancel.clone();
        async move { scheduler.run_loop(cancel).await }
    });
    info!(poll_interval_secs = config.scheduler.poll_interval_secs, "scheduler loop started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler_cancel.cancel();
    let _ = scheduler_handle.await;
    manager.shutdown().await;

    Ok(())
}
