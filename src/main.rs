//! Triage Server - Security Frame Triage Pipeline
//!
//! Main entry point for the triage server.

use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triage_server::{
    classifier::GeminiClassifier,
    consumer::{ConsumerStats, FrameConsumer, FramePublisher},
    frame_cache::FrameCache,
    gateway,
    ledger::SqlIncidentStore,
    reconciler::{GeminiDecider, ReconcileLoop},
    state::{AppConfig, AppState},
    workflow::WorkflowEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triage_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Triage Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        kafka_broker = %config.kafka_broker,
        kafka_topic = %config.kafka_topic,
        kafka_group_id = %config.kafka_group_id,
        llm_model = %config.llm_model,
        image_dir = %config.image_dir.display(),
        save_images = config.save_images,
        "Configuration loaded"
    );

    if config.gemini_api_key.is_empty() {
        anyhow::bail!("GEMINI_API_KEY is not set");
    }

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize the incident ledger
    let store = Arc::new(SqlIncidentStore::new(pool.clone()));
    store.init_schema().await?;
    tracing::info!("Incident ledger initialized");

    // Frame cache
    let frame_cache = Arc::new(FrameCache::new(config.save_images, config.image_dir.clone()));
    frame_cache.init().await?;

    // Model-backed components
    let classifier = Arc::new(GeminiClassifier::new(
        config.gemini_api_key.clone(),
        config.llm_model.clone(),
    ));
    let decider = Arc::new(GeminiDecider::new(
        config.gemini_api_key.clone(),
        config.llm_model.clone(),
    ));
    let reconciler = ReconcileLoop::new(store.clone(), decider)
        .with_max_iterations(config.reconcile_max_iterations);

    let engine = Arc::new(WorkflowEngine::new(classifier, reconciler, frame_cache));

    // Broker plumbing; an unreachable broker is fatal at startup
    let broker = config.broker();
    let stats = Arc::new(ConsumerStats::default());
    let consumer = FrameConsumer::connect(&broker, engine, stats.clone()).await?;
    let publisher = Arc::new(FramePublisher::new(&broker)?);

    // Consumer loop runs alongside the HTTP server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(async move {
        consumer.run(shutdown_rx).await;
    });

    let state = AppState {
        pool,
        config: config.clone(),
        store,
        publisher,
        stats,
    };

    let app = gateway::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "HTTP gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Stop the consumer and let the in-flight frame drain
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_handle.await {
        tracing::warn!(error = %e, "Consumer task did not shut down cleanly");
    }

    tracing::info!("Triage Server stopped");
    Ok(())
}
