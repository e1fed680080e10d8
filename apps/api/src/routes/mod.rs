pub mod health;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::orchestration::handlers;
use crate::rate_limit::rate_limit;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let rate_limiter = Arc::clone(&state.rate_limiter);

    Router::new()
        .route("/health", get(health::health_handler))
        // AI operations
        .route("/api/v1/ai/analyze", post(handlers::handle_analyze))
        .route("/api/v1/ai/match", post(handlers::handle_match))
        .route("/api/v1/ai/suggestions", post(handlers::handle_suggestions))
        // Provider health
        .route(
            "/api/v1/ai/providers/health",
            get(handlers::handle_provider_health),
        )
        .route(
            "/api/v1/ai/providers/health/reset",
            post(handlers::handle_reset_provider_health),
        )
        // Analytics
        .route(
            "/api/v1/ai/analytics/costs",
            get(handlers::handle_cost_analytics),
        )
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit))
        .with_state(state)
}
