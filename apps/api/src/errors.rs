use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::orchestration::OrchestrationError;
use crate::store::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many requests, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::RateLimited { retry_after } => {
                let body = Json(json!({
                    "error": {
                        "code": "RATE_LIMIT_ERROR",
                        "message": "Too many requests, please try again later",
                        "retryAfter": retry_after
                    }
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after));
                return response;
            }
            AppError::Orchestration(
                e @ OrchestrationError::AllProvidersExhausted { attempts, .. },
            ) => {
                let tried: Vec<String> = attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.provider, a.error))
                    .collect();
                tracing::error!(attempts = ?tried, "{e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ALL_PROVIDERS_EXHAUSTED",
                    e.to_string(),
                )
            }
            AppError::Orchestration(e @ OrchestrationError::UnknownProvider(_)) => {
                (StatusCode::BAD_REQUEST, "UNKNOWN_PROVIDER", e.to_string())
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::{Operation, ProviderAttempt};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let response = AppError::RateLimited { retry_after: 12 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT_ERROR");
        assert_eq!(body["error"]["retryAfter"], 12);
    }

    #[tokio::test]
    async fn test_exhausted_maps_to_503() {
        let err = OrchestrationError::AllProvidersExhausted {
            operation: Operation::Analysis,
            attempts: vec![ProviderAttempt {
                provider: "gemini".into(),
                error: "boom".into(),
            }],
        };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "ALL_PROVIDERS_EXHAUSTED");
    }

    #[tokio::test]
    async fn test_unknown_provider_maps_to_400() {
        let err = OrchestrationError::UnknownProvider("mistral".into());
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNKNOWN_PROVIDER");
    }
}
