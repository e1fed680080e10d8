//! Scripted providers and a broken store for orchestration and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::analysis::{AnalysisResult, MatchResult};
use crate::orchestration::registry::ProviderDescriptor;
use crate::providers::{AiProvider, ProviderError};
use crate::store::{KvStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Upstream 500.
    Fail,
    /// Never answers; only a timeout gets the engine past it.
    Hang,
    /// Answers with something that is not the expected JSON.
    Malformed,
}

pub struct ScriptedProvider {
    name: String,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn with_behavior(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::with_behavior(name, Behavior::Succeed)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T>(&self, ok: impl FnOnce(&str) -> T) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(ok(&self.name)),
            Behavior::Fail => Err(ProviderError::Api {
                status: 500,
                message: format!("{} is down", self.name),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::EmptyContent)
            }
            Behavior::Malformed => Err(ProviderError::Parse(
                serde_json::from_str::<Value>("not json").unwrap_err(),
            )),
        }
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _text: &str, _options: &Value) -> Result<AnalysisResult, ProviderError> {
        self.respond(|name| AnalysisResult {
            overall_score: 80,
            summary: format!("analyzed by {name}"),
            strengths: vec!["Clear structure".to_string()],
            weaknesses: Vec::new(),
            keywords: vec!["rust".to_string()],
            section_feedback: Vec::new(),
        })
        .await
    }

    async fn generate_suggestions(
        &self,
        _text: &str,
        _job_description: Option<&str>,
        _options: &Value,
    ) -> Result<Vec<String>, ProviderError> {
        self.respond(|name| vec![format!("suggestion from {name}")])
            .await
    }

    async fn match_against_description(
        &self,
        _text: &str,
        _job_description: &str,
        _options: &Value,
    ) -> Result<MatchResult, ProviderError> {
        self.respond(|_| MatchResult {
            match_score: 70,
            matched_keywords: vec!["rust".to_string()],
            missing_keywords: vec!["kafka".to_string()],
            recommendations: Vec::new(),
        })
        .await
    }
}

pub fn descriptor(name: &str, priority: i32) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        priority,
        cost_per_unit: 1.0,
    }
}

/// Every call fails as if the backing server were unreachable.
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(unavailable())
    }

    async fn set_with_expiry(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn increment_int(&self, _key: &str, _field: &str, _by: i64) -> Result<i64, StoreError> {
        Err(unavailable())
    }

    async fn increment_float(
        &self,
        _key: &str,
        _field: &str,
        _by: f64,
    ) -> Result<f64, StoreError> {
        Err(unavailable())
    }

    async fn get_all_fields(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Err(unavailable())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(unavailable())
    }
}
