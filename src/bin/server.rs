//! Composition root: loads configuration, wires the configured storage
//! backends into an `AppState`, and serves the HTTP transport.

use std::path::PathBuf;
use std::sync::Arc;

use cstp_server::config::{Config, DecisionBackend, VectorBackend};
use cstp_server::dispatch::http;
use cstp_server::storage::{
    http_embedding::EmbeddingClientConfig, DecisionStore, EmbeddingProvider, GraphStore,
    HttpEmbeddingProvider, InMemoryDecisionStore, InMemoryEmbeddingProvider, InMemoryGraphStore,
    InMemoryVectorStore, JsonlGraphStore, SqliteDecisionStore, VectorStore,
};
use cstp_server::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("CSTP_CONFIG_PATH").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    let decision_store: Arc<dyn DecisionStore> = match config.decision_backend {
        DecisionBackend::Sqlite => {
            if let Some(parent) = config.decisions_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SqliteDecisionStore::open(&config.decisions_path)?)
        }
        DecisionBackend::Memory => Arc::new(InMemoryDecisionStore::new()),
    };

    let vector_store: Arc<dyn VectorStore> = match config.vector_backend {
        VectorBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };

    let embedding_provider: Arc<dyn EmbeddingProvider> = match &config.embedding.base_url {
        Some(base_url) => {
            let mut client_config =
                EmbeddingClientConfig::new(base_url.clone(), config.embedding.model.clone(), config.embedding.dimensions)
                    .with_timeout(config.embedding.timeout_secs);
            if let Some(api_key) = &config.embedding.api_key {
                client_config = client_config.with_api_key(api_key.clone());
            }
            Arc::new(HttpEmbeddingProvider::new(client_config))
        }
        None => {
            tracing::warn!("no embedding backend configured, falling back to the deterministic in-process provider");
            Arc::new(InMemoryEmbeddingProvider::new(config.embedding.dimensions))
        }
    };

    let graph_store: Arc<dyn GraphStore> = if let Some(parent) = config.graph_journal_path.parent() {
        std::fs::create_dir_all(parent)?;
        Arc::new(JsonlGraphStore::open(&config.graph_journal_path)?)
    } else {
        Arc::new(InMemoryGraphStore::new())
    };

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone(), decision_store, vector_store, embedding_provider, graph_store));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "cstp-server listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("cstp-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
