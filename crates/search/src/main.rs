//! KGForge Search Service
//!
//! HTTP service providing:
//! - Conversation-aware query resolution
//! - Hybrid chunk retrieval (pgvector + PostgreSQL full-text)
//! - Entity graph expansion per source document
//! - Result caching via Redis

use kgforge_common::{
    cache::{Cache, CacheConfig},
    config::AppConfig,
    embeddings::create_embedder,
    graph::{GraphStore, InMemoryGraphStore, PgGraphStore},
    llm::LlmReformulator,
    metrics, VERSION,
};
use kgforge_search::{
    create_router, orchestrator::QueryOrchestrator, AppState, RetrievalEngine,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration; CONFIG_FILE pins a single file
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!("Starting KGForge Search Service v{}", VERSION);

    // Initialize metrics
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()?;
    metrics::register_metrics();
    info!("Metrics exporter listening on {}", metrics_addr);

    // Graph store: Postgres when configured, otherwise in-memory
    let store: Arc<dyn GraphStore> = match config.database.url {
        Some(_) => {
            let store = PgGraphStore::connect(&config.database).await?;
            // Refuse to serve without both search indexes
            store.verify_indexes().await?;
            Arc::new(store)
        }
        None => {
            let store = match &config.database.snapshot_path {
                Some(path) => InMemoryGraphStore::load(path)?,
                None => {
                    warn!("No database or snapshot configured, serving an empty graph");
                    InMemoryGraphStore::new()
                }
            };
            Arc::new(store)
        }
    };

    let embedder = create_embedder(&config.embedding)?;

    let orchestrator = match config.llm.api_key {
        Some(_) => QueryOrchestrator::new(Arc::new(LlmReformulator::new(config.llm.clone())?)),
        None => {
            warn!("LLM API key not set, follow-up turns will be rejected");
            QueryOrchestrator::without_reformulator()
        }
    };

    // Initialize Redis cache (optional)
    let cache = match &config.redis.url {
        Some(url) => {
            info!("Connecting to Redis at {}", url);
            let cache_config = CacheConfig {
                url: url.clone(),
                key_prefix: config.redis.key_prefix.clone(),
            };
            match Cache::connect(cache_config).await {
                Ok(cache) => {
                    info!("Redis cache connected");
                    Some(Arc::new(cache))
                }
                Err(e) => {
                    warn!("Failed to connect to Redis, caching disabled: {}", e);
                    None
                }
            }
        }
        None => {
            warn!("redis.url not set, caching disabled");
            None
        }
    };

    let mut engine = RetrievalEngine::new(
        store.clone(),
        embedder,
        orchestrator,
        Arc::new(config.retrieval.clone()),
    )?;
    if let Some(cache) = &cache {
        engine = engine.with_cache(cache.clone());
    }

    let state = AppState {
        engine: Arc::new(engine),
        store,
        cache,
    };

    let app = create_router(state, config.request_timeout());

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Search service shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
