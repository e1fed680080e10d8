mod config;
mod errors;
mod models;
mod orchestration;
mod providers;
mod rate_limit;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::orchestration::registry::{ProviderDescriptor, ProviderRegistry};
use crate::orchestration::AiService;
use crate::providers::{AiProvider, ChatBackend, LlmProvider};
use crate::rate_limit::RateLimitGuard;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{KvStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing provider keys)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume AI API v{}", env!("CARGO_PKG_VERSION"));

    let store = connect_store(config.redis_url.as_deref()).await;

    // One pooled HTTP client shared by every provider backend
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let providers: Vec<_> = config
        .providers
        .iter()
        .map(|p| {
            let name = p.kind.as_str();
            info!(
                provider = name,
                model = %p.model,
                priority = p.priority,
                "AI provider enabled"
            );
            let backend = ChatBackend::new(p.kind, http.clone(), p.api_key.clone(), p.model.clone());
            let provider: Arc<dyn AiProvider> = Arc::new(LlmProvider::new(name, backend));
            let descriptor = ProviderDescriptor {
                name: name.to_string(),
                priority: p.priority,
                cost_per_unit: p.cost_per_unit,
            };
            (descriptor, provider)
        })
        .collect();
    let registry = ProviderRegistry::new(providers);
    if registry.is_empty() {
        anyhow::bail!("No AI providers registered");
    }
    info!("{} AI provider(s) registered", registry.len());

    let ai = Arc::new(AiService::new(registry, store, config.ai_settings()));
    if config.rate_limit_trust_forwarded {
        info!("Rate limit identity taken from X-User-Id / X-Forwarded-For (trusted proxy)");
    }
    let rate_limiter = Arc::new(RateLimitGuard::new(config.rate_limit()));

    let state = AppState {
        ai: Arc::clone(&ai),
        rate_limiter,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Draining background tasks");
    ai.drain_background().await;
    info!("Shutdown complete");

    Ok(())
}

/// Redis when configured and reachable, otherwise the in-process store.
async fn connect_store(redis_url: Option<&str>) -> Arc<dyn KvStore> {
    let Some(url) = redis_url else {
        warn!("REDIS_URL not set; using in-memory store (cache and usage are per-process)");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Redis unavailable ({e}); falling back to in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
