use std::sync::Arc;

use crate::orchestration::AiService;
use crate::rate_limit::RateLimitGuard;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub ai: Arc<AiService>,
    /// Also handed to the rate limit middleware as its own state.
    pub rate_limiter: Arc<RateLimitGuard>,
}
