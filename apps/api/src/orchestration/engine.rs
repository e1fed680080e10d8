//! Failover Execution Engine.
//!
//! For one request:
//! 1. fingerprint → cache lookup; a hit returns without touching providers
//!    or usage.
//! 2. candidates = pinned provider (health ignored) or the healthy list; an
//!    empty healthy list triggers one `reset_all` and the full list.
//! 3. each candidate runs under a timeout. Success → detached cache write +
//!    usage record, return. Failure (error, timeout, malformed output) →
//!    mark unhealthy, log, next candidate.
//! 4. no success → `AllProvidersExhausted`. The engine never retries a request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use crate::orchestration::background::BackgroundTasks;
use crate::orchestration::cache::{Fingerprint, ResponseCache};
use crate::orchestration::registry::{ProviderRegistry, RegisteredProvider};
use crate::orchestration::usage::{estimate_tokens, UsageMeter};
use crate::orchestration::{Operation, OrchestrationError, ProviderAttempt};
use crate::providers::{AiProvider, ProviderError};

/// A logical operation request, independent of which provider serves it.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub operation: Operation,
    /// Canonical input text: hashed into the fingerprint and used for the
    /// token estimate.
    pub input: String,
    pub options: Value,
    pub pinned_provider: Option<String>,
}

pub struct FailoverEngine {
    registry: Arc<ProviderRegistry>,
    cache: ResponseCache,
    usage: UsageMeter,
    background: Arc<BackgroundTasks>,
    provider_timeout: Duration,
}

impl FailoverEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: ResponseCache,
        usage: UsageMeter,
        background: Arc<BackgroundTasks>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            usage,
            background,
            provider_timeout,
        }
    }

    /// Runs `call` against candidates until one succeeds.
    ///
    /// `call` receives each candidate provider in turn and performs the
    /// operation-specific capability call.
    pub async fn execute<T, F, Fut>(
        &self,
        request: OperationRequest,
        call: F,
    ) -> Result<T, OrchestrationError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(Arc<dyn AiProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let operation = request.operation;
        let fingerprint = Fingerprint::compute(operation, &request.input, &request.options);

        // An unknown pin is rejected whether or not the result is cached.
        if let Some(name) = request.pinned_provider.as_deref() {
            if self.registry.get(name).is_none() {
                return Err(OrchestrationError::UnknownProvider(name.to_string()));
            }
        }

        if self.cache.is_enabled() {
            if let Some(hit) = self.cache.get::<T>(&fingerprint).await {
                info!(%operation, %fingerprint, "Served from cache");
                return Ok(hit);
            }
        }

        let candidates = self.candidates(request.pinned_provider.as_deref())?;
        let mut attempts = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let name = candidate.descriptor.name.clone();
            debug!(provider = %name, %operation, %fingerprint, "Calling provider");

            let attempt = call(Arc::clone(&candidate.provider));
            let outcome = match tokio::time::timeout(self.provider_timeout, attempt).await {
                Ok(result) => result,
                // Dropping the timed-out future cancels the HTTP request and
                // returns its connection to the pool.
                Err(_) => Err(ProviderError::Timeout(self.provider_timeout)),
            };

            match outcome {
                Ok(result) => {
                    self.registry.record_success(&name);
                    self.after_success(&candidate, &request, &fingerprint, &result);
                    info!(provider = %name, %operation, %fingerprint, "Provider call succeeded");
                    return Ok(result);
                }
                Err(e) => {
                    self.registry.mark_unhealthy(&name);
                    warn!(
                        provider = %name,
                        %operation,
                        %fingerprint,
                        error = %e,
                        "Provider call failed, trying next candidate"
                    );
                    attempts.push(ProviderAttempt {
                        provider: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        error!(
            %operation,
            %fingerprint,
            attempted = attempts.len(),
            "All AI providers exhausted"
        );
        Err(OrchestrationError::AllProvidersExhausted {
            operation,
            attempts,
        })
    }

    /// Candidate order for one request.
    fn candidates(
        &self,
        pinned: Option<&str>,
    ) -> Result<Vec<RegisteredProvider>, OrchestrationError> {
        if let Some(name) = pinned {
            return self
                .registry
                .get(name)
                .map(|p| vec![p])
                .ok_or_else(|| OrchestrationError::UnknownProvider(name.to_string()));
        }

        let healthy = self.registry.healthy();
        if !healthy.is_empty() {
            return Ok(healthy);
        }

        warn!("No healthy AI providers; resetting health and retrying the full list once");
        self.registry.reset_all();
        Ok(self.registry.list_by_priority())
    }

    /// Queues the cache write and usage record as detached tasks.
    fn after_success<T: Serialize>(
        &self,
        candidate: &RegisteredProvider,
        request: &OperationRequest,
        fingerprint: &Fingerprint,
        result: &T,
    ) {
        let provider = candidate.descriptor.name.clone();
        let operation = request.operation;

        if self.cache.is_enabled() {
            match serde_json::to_string(result) {
                Ok(payload) => {
                    let cache = self.cache.clone();
                    let key = fingerprint.clone();
                    self.background.spawn(
                        info_span!("cache_write", %provider, %operation, %fingerprint),
                        async move { cache.put(&key, &payload).await },
                    );
                }
                Err(e) => {
                    warn!(%provider, %operation, %fingerprint, "Result not cacheable: {e}");
                }
            }
        }

        let usage = self.usage.clone();
        let tokens = estimate_tokens(&request.input);
        let cost_per_unit = candidate.descriptor.cost_per_unit;
        let span = info_span!("usage_record", %provider, %operation, %fingerprint);
        self.background.spawn(span, async move {
            usage
                .record(&provider, operation, tokens, cost_per_unit)
                .await
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::AnalysisResult;
    use crate::orchestration::usage::DateRange;
    use crate::store::{KvStore, MemoryStore};
    use crate::test_support::{descriptor, Behavior, FailingStore, ScriptedProvider};
    use chrono::Utc;
    use serde_json::json;

    struct Harness {
        engine: FailoverEngine,
        registry: Arc<ProviderRegistry>,
        usage: UsageMeter,
        background: Arc<BackgroundTasks>,
    }

    fn harness(providers: &[(&Arc<ScriptedProvider>, i32)], store: Arc<dyn KvStore>) -> Harness {
        let registry = Arc::new(ProviderRegistry::new(
            providers
                .iter()
                .map(|(p, priority)| {
                    let provider: Arc<dyn AiProvider> = Arc::clone(p) as Arc<dyn AiProvider>;
                    (descriptor(p.name(), *priority), provider)
                })
                .collect(),
        ));
        let cache = ResponseCache::new(store.clone(), Duration::from_secs(86_400), true);
        let usage = UsageMeter::new(store, 30);
        let background = Arc::new(BackgroundTasks::new());
        let engine = FailoverEngine::new(
            registry.clone(),
            cache,
            usage.clone(),
            background.clone(),
            Duration::from_secs(5),
        );
        Harness {
            engine,
            registry,
            usage,
            background,
        }
    }

    fn analyze_request(input: &str, pinned: Option<&str>) -> OperationRequest {
        OperationRequest {
            operation: Operation::Analysis,
            input: input.to_string(),
            options: json!({}),
            pinned_provider: pinned.map(str::to_string),
        }
    }

    async fn analyze(
        h: &Harness,
        input: &str,
        pinned: Option<&str>,
    ) -> Result<AnalysisResult, OrchestrationError> {
        let text = input.to_string();
        h.engine
            .execute(analyze_request(input, pinned), move |p| {
                let text = text.clone();
                async move { p.analyze(&text, &json!({})).await }
            })
            .await
    }

    async fn analysis_count(h: &Harness, provider: &str) -> u64 {
        let today = Utc::now().date_naive();
        let report = h
            .usage
            .report(provider, DateRange::new(today, today, 30).unwrap())
            .await
            .unwrap();
        report[0].operations["analysis"]
    }

    #[tokio::test]
    async fn test_first_healthy_provider_wins() {
        let p1 = ScriptedProvider::succeeding("p1");
        let p2 = ScriptedProvider::succeeding("p2");
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));

        let result = analyze(&h, "cv", None).await.unwrap();
        assert_eq!(result.summary, "analyzed by p1");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn test_failover_skips_unhealthy_and_marks_failures() {
        let p1 = ScriptedProvider::with_behavior("p1", Behavior::Fail);
        let p2 = ScriptedProvider::succeeding("p2");
        let p3 = ScriptedProvider::succeeding("p3");
        let h = harness(&[(&p1, 1), (&p2, 2), (&p3, 3)], Arc::new(MemoryStore::new()));
        h.registry.mark_unhealthy("p3");

        let result = analyze(&h, "cv", None).await.unwrap();
        assert_eq!(result.summary, "analyzed by p2");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
        assert_eq!(p3.calls(), 0);

        let health = h.registry.snapshot();
        assert!(!health["p1"].healthy);
        assert!(health["p2"].healthy);
    }

    #[tokio::test]
    async fn test_all_unhealthy_resets_once_and_walks_full_list() {
        let p1 = ScriptedProvider::with_behavior("p1", Behavior::Fail);
        let p2 = ScriptedProvider::succeeding("p2");
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));
        h.registry.mark_unhealthy("p1");
        h.registry.mark_unhealthy("p2");

        let result = analyze(&h, "cv", None).await.unwrap();
        assert_eq!(result.summary, "analyzed by p2");
        // p1 was retried after the reset, in priority order.
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);

        let health = h.registry.snapshot();
        assert!(!health["p1"].healthy);
        assert!(health["p2"].healthy);
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted_without_retry() {
        let p1 = ScriptedProvider::with_behavior("p1", Behavior::Fail);
        let p2 = ScriptedProvider::with_behavior("p2", Behavior::Malformed);
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));

        let err = analyze(&h, "cv", None).await.unwrap_err();
        match err {
            OrchestrationError::AllProvidersExhausted {
                operation,
                attempts,
            } => {
                assert_eq!(operation, Operation::Analysis);
                let names: Vec<&str> = attempts.iter().map(|a| a.provider.as_str()).collect();
                assert_eq!(names, vec!["p1", "p2"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
        assert!(h.registry.healthy().is_empty());
    }

    #[tokio::test]
    async fn test_pinned_provider_ignores_health() {
        let p1 = ScriptedProvider::succeeding("p1");
        let p2 = ScriptedProvider::succeeding("p2");
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));
        h.registry.mark_unhealthy("p2");

        let result = analyze(&h, "cv", Some("p2")).await.unwrap();
        assert_eq!(result.summary, "analyzed by p2");
        assert_eq!(p1.calls(), 0);
        // Success does not restore health.
        assert!(!h.registry.snapshot()["p2"].healthy);
    }

    #[tokio::test]
    async fn test_pinned_provider_failure_does_not_fall_back() {
        let p1 = ScriptedProvider::succeeding("p1");
        let p2 = ScriptedProvider::with_behavior("p2", Behavior::Fail);
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));

        let err = analyze(&h, "cv", Some("p2")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::AllProvidersExhausted { .. }
        ));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_pinned_provider() {
        let p1 = ScriptedProvider::succeeding("p1");
        let h = harness(&[(&p1, 1)], Arc::new(MemoryStore::new()));

        let err = analyze(&h, "cv", Some("mistral")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownProvider(ref n) if n == "mistral"));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_pin_rejected_even_when_cached() {
        let p1 = ScriptedProvider::succeeding("p1");
        let h = harness(&[(&p1, 1)], Arc::new(MemoryStore::new()));

        analyze(&h, "cv", None).await.unwrap();
        h.background.drain().await;

        let err = analyze(&h, "cv", Some("mistral")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownProvider(ref n) if n == "mistral"));

        // A known pin is still served from the cache.
        let cached = analyze(&h, "cv", Some("p1")).await.unwrap();
        assert_eq!(cached.summary, "analyzed by p1");
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out() {
        let p1 = ScriptedProvider::with_behavior("p1", Behavior::Hang);
        let p2 = ScriptedProvider::succeeding("p2");
        let h = harness(&[(&p1, 1), (&p2, 2)], Arc::new(MemoryStore::new()));

        let result = analyze(&h, "cv", None).await.unwrap();
        assert_eq!(result.summary, "analyzed by p2");
        assert!(!h.registry.snapshot()["p1"].healthy);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers_and_usage() {
        let p1 = ScriptedProvider::succeeding("p1");
        let h = harness(&[(&p1, 1)], Arc::new(MemoryStore::new()));

        let first = analyze(&h, "Experienced engineer", None).await.unwrap();
        h.background.drain().await;
        assert_eq!(analysis_count(&h, "p1").await, 1);

        let second = analyze(&h, "Experienced engineer", None).await.unwrap();
        h.background.drain().await;
        assert_eq!(first, second);
        assert_eq!(p1.calls(), 1);
        assert_eq!(analysis_count(&h, "p1").await, 1);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_uncached() {
        let p1 = ScriptedProvider::succeeding("p1");
        let h = harness(&[(&p1, 1)], Arc::new(FailingStore));

        analyze(&h, "cv", None).await.unwrap();
        h.background.drain().await;
        analyze(&h, "cv", None).await.unwrap();
        h.background.drain().await;
        assert_eq!(p1.calls(), 2);
        assert!(h.registry.snapshot()["p1"].healthy);
    }

    #[tokio::test]
    async fn test_empty_registry_is_exhausted() {
        let h = harness(&[], Arc::new(MemoryStore::new()));
        let err = analyze(&h, "cv", None).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::AllProvidersExhausted { ref attempts, .. } if attempts.is_empty()
        ));
    }
}
