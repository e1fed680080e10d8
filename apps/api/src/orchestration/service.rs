//! AiService: the operation surface the rest of the application calls.
//!
//! Owns the registry, cache, usage meter and background task handle, and
//! wires them into one `FailoverEngine`. Constructed once at startup and
//! shared behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::models::analysis::{AnalysisResult, MatchResult};
use crate::orchestration::background::BackgroundTasks;
use crate::orchestration::cache::ResponseCache;
use crate::orchestration::engine::{FailoverEngine, OperationRequest};
use crate::orchestration::registry::{ProviderHealth, ProviderRegistry};
use crate::orchestration::usage::{DailyUsage, DateRange, UsageMeter};
use crate::orchestration::{Operation, OrchestrationError};
use crate::store::{KvStore, StoreError};

/// Tuning knobs for the orchestration layer, derived from `Config`.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub provider_timeout: Duration,
    pub usage_retention_days: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            provider_timeout: Duration::from_secs(30),
            usage_retention_days: 30,
        }
    }
}

/// Cost analytics for every registered provider over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct CostAnalytics {
    pub from: chrono::NaiveDate,
    pub to: chrono::NaiveDate,
    pub providers: BTreeMap<String, ProviderCostReport>,
    pub total_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCostReport {
    pub days: Vec<DailyUsage>,
    pub total_tokens: u64,
    pub total_cost: f64,
}

pub struct AiService {
    engine: FailoverEngine,
    registry: Arc<ProviderRegistry>,
    usage: UsageMeter,
    background: Arc<BackgroundTasks>,
    retention_days: u32,
}

impl AiService {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn KvStore>, settings: AiSettings) -> Self {
        let registry = Arc::new(registry);
        let background = Arc::new(BackgroundTasks::new());
        let cache = ResponseCache::new(
            Arc::clone(&store),
            settings.cache_ttl,
            settings.cache_enabled,
        );
        let usage = UsageMeter::new(store, settings.usage_retention_days);
        let engine = FailoverEngine::new(
            Arc::clone(&registry),
            cache,
            usage.clone(),
            Arc::clone(&background),
            settings.provider_timeout,
        );

        Self {
            engine,
            registry,
            usage,
            background,
            retention_days: settings.usage_retention_days,
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Analyzes resume text. `provider` pins the call to one backend.
    pub async fn analyze_resume(
        &self,
        content: &str,
        file_name: &str,
        provider: Option<&str>,
    ) -> Result<AnalysisResult, OrchestrationError> {
        info!(file_name, pinned = provider, "Analyzing resume");
        let options = json!({});
        let request = OperationRequest {
            operation: Operation::Analysis,
            input: content.to_string(),
            options: options.clone(),
            pinned_provider: provider.map(str::to_string),
        };

        let text = content.to_string();
        self.engine
            .execute(request, move |p| {
                let text = text.clone();
                let options = options.clone();
                async move { p.analyze(&text, &options).await }
            })
            .await
    }

    pub async fn match_job_description(
        &self,
        resume_text: &str,
        job_description: &str,
        options: Option<Value>,
    ) -> Result<MatchResult, OrchestrationError> {
        let options = options.unwrap_or_else(|| json!({}));
        let request = OperationRequest {
            operation: Operation::Matching,
            input: matching_input(resume_text, Some(job_description)),
            options: options.clone(),
            pinned_provider: None,
        };

        let resume = resume_text.to_string();
        let jd = job_description.to_string();
        self.engine
            .execute(request, move |p| {
                let (resume, jd, options) = (resume.clone(), jd.clone(), options.clone());
                async move { p.match_against_description(&resume, &jd, &options).await }
            })
            .await
    }

    pub async fn generate_suggestions(
        &self,
        resume_text: &str,
        job_description: Option<&str>,
        options: Option<Value>,
    ) -> Result<Vec<String>, OrchestrationError> {
        let options = options.unwrap_or_else(|| json!({}));
        let request = OperationRequest {
            operation: Operation::Suggestions,
            input: matching_input(resume_text, job_description),
            options: options.clone(),
            pinned_provider: None,
        };

        let resume = resume_text.to_string();
        let jd = job_description.map(str::to_string);
        self.engine
            .execute(request, move |p| {
                let (resume, jd, options) = (resume.clone(), jd.clone(), options.clone());
                async move {
                    p.generate_suggestions(&resume, jd.as_deref(), &options)
                        .await
                }
            })
            .await
    }

    pub fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.registry.snapshot()
    }

    pub fn reset_provider_health(&self) {
        self.registry.reset_all();
    }

    /// Per-provider, per-day usage for `range`, with totals.
    pub async fn cost_analytics(&self, range: DateRange) -> Result<CostAnalytics, StoreError> {
        let mut providers = BTreeMap::new();
        let mut total_tokens = 0;
        let mut total_cost = 0.0;

        for name in self.registry.names() {
            let days = self.usage.report(&name, range).await?;
            let report = ProviderCostReport {
                total_tokens: days.iter().map(|d| d.tokens).sum(),
                total_cost: days.iter().map(|d| d.cost).sum(),
                days,
            };
            total_tokens += report.total_tokens;
            total_cost += report.total_cost;
            providers.insert(name, report);
        }

        Ok(CostAnalytics {
            from: range.from,
            to: range.to,
            providers,
            total_tokens,
            total_cost,
        })
    }

    /// Waits for pending cache writes and usage records.
    pub async fn drain_background(&self) {
        self.background.drain().await;
    }
}

/// Canonical input text for operations that take a job description too.
fn matching_input(resume_text: &str, job_description: Option<&str>) -> String {
    match job_description {
        Some(jd) => format!("{resume_text}\n\n--- JOB DESCRIPTION ---\n\n{jd}"),
        None => resume_text.to_string(),
    }
}
