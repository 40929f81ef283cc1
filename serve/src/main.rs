//! Server entry point: load config, connect the shared handles, serve.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use env_config::{EmbeddingProvider, Settings};
use serve::{router, AppState};
use weft::{
    Embedder, HashEmbedder, OpenAiEmbedder, Orchestrator, RedisSessionStore, SessionGate,
    TavilySearch, ToolRegistry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_config::load_and_apply(None)?;
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.app_log_level.clone())),
        )
        .init();

    let pool = weft::connect(
        &settings.database_url,
        settings.db_pool_min,
        settings.db_pool_max,
        settings.db_idle_secs,
    )
    .await?;

    // One embedding handle process-wide; warmed below.
    let embedder: Arc<dyn Embedder> = match settings.embedding_provider {
        EmbeddingProvider::Local => Arc::new(HashEmbedder::new(settings.embedding_dimension)),
        EmbeddingProvider::OpenAiCompatible => Arc::new(OpenAiEmbedder::new(
            settings.embedding_model.clone(),
            settings.embedding_dimension,
            settings.embedding_api_key.as_deref(),
            settings.embedding_base_url.as_deref(),
        )),
    };
    if let Err(e) = embedder.embed("warmup").await {
        tracing::warn!("embedding warmup failed: {e}");
    }

    let model = weft::llm::provider_from_settings(&settings);
    let search = Arc::new(TavilySearch::new(
        settings.tavily_api_key.clone().unwrap_or_default(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        pool,
        model,
        embedder,
        Arc::new(ToolRegistry::builtin()),
        search,
        &settings,
    )?);

    let sessions = Arc::new(RedisSessionStore::connect(&settings.redis_url).await?);
    let gate = Arc::new(SessionGate::new(sessions, &settings));

    let app = router(AppState { orchestrator, gate });
    let addr = format!("{}:{}", settings.app_host, settings.app_port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
