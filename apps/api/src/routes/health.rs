use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status and how many AI providers are currently healthy.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let providers = state.ai.provider_health();
    let healthy = providers.values().filter(|h| h.healthy).count();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "resume-ai-api",
        "providers": {
            "total": providers.len(),
            "healthy": healthy
        }
    }))
}
