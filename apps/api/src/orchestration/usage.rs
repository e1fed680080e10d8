//! Usage Meter: per-provider, per-day token/cost/operation counters.
//!
//! One store hash per (provider, UTC date):
//!   `ai:usage:<provider>:<YYYY-MM-DD>` → { tokens, cost, analysis, suggestions, matching }
//! Each record is additive only and carries a rolling retention TTL.
//! Recording is best-effort; the engine runs it as a detached task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::orchestration::Operation;
use crate::store::{KvStore, StoreError};

const KEY_PREFIX: &str = "ai:usage:";
const TOKENS_FIELD: &str = "tokens";
const COST_FIELD: &str = "cost";

/// Rough chars-per-token ratio. Good enough for cost trending, not billing.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Cheap token estimate: character count / 4, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// `estimate / 1000 * cost_per_unit`.
pub fn estimate_cost(tokens: u64, cost_per_unit: f64) -> f64 {
    tokens as f64 / 1000.0 * cost_per_unit
}

/// One provider's usage on one day. Days with no activity are all zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub tokens: u64,
    pub cost: f64,
    pub operations: BTreeMap<String, u64>,
}

impl DailyUsage {
    fn from_fields(date: NaiveDate, fields: &HashMap<String, String>) -> Self {
        let parse_u64 = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let operations = Operation::ALL
            .iter()
            .map(|op| (op.as_str().to_string(), parse_u64(op.as_str())))
            .collect();

        Self {
            date,
            tokens: parse_u64(TOKENS_FIELD),
            cost: fields
                .get(COST_FIELD)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
            operations,
        }
    }
}

/// Inclusive date range, validated against the retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate, max_days: u32) -> Result<Self, String> {
        if from > to {
            return Err(format!("from ({from}) must not be after to ({to})"));
        }
        let days = (to - from).num_days() + 1;
        if days > i64::from(max_days) {
            return Err(format!(
                "date range spans {days} days; at most {max_days} days are retained"
            ));
        }
        Ok(Self { from, to })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }
}

#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn KvStore>,
    retention: Duration,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn KvStore>, retention_days: u32) -> Self {
        Self {
            store,
            retention: Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60),
        }
    }

    fn key(provider: &str, date: NaiveDate) -> String {
        format!("{KEY_PREFIX}{provider}:{}", date.format("%Y-%m-%d"))
    }

    /// Adds one invocation of `operation` to today's record for `provider`.
    pub async fn record(
        &self,
        provider: &str,
        operation: Operation,
        estimated_tokens: u64,
        cost_per_unit: f64,
    ) -> Result<(), StoreError> {
        self.record_on(
            Utc::now().date_naive(),
            provider,
            operation,
            estimated_tokens,
            cost_per_unit,
        )
        .await
    }

    async fn record_on(
        &self,
        date: NaiveDate,
        provider: &str,
        operation: Operation,
        estimated_tokens: u64,
        cost_per_unit: f64,
    ) -> Result<(), StoreError> {
        let key = Self::key(provider, date);
        let tokens = i64::try_from(estimated_tokens).unwrap_or(i64::MAX);
        let cost = estimate_cost(estimated_tokens, cost_per_unit);

        self.store.increment_int(&key, TOKENS_FIELD, tokens).await?;
        self.store.increment_float(&key, COST_FIELD, cost).await?;
        self.store
            .increment_int(&key, operation.as_str(), 1)
            .await?;
        self.store.expire(&key, self.retention).await?;

        debug!(
            provider,
            operation = %operation,
            tokens = estimated_tokens,
            cost,
            "Usage recorded"
        );
        Ok(())
    }

    /// One record per day in `range`, oldest first.
    pub async fn report(
        &self,
        provider: &str,
        range: DateRange,
    ) -> Result<Vec<DailyUsage>, StoreError> {
        let mut days = Vec::new();
        for date in range.days() {
            let fields = self.store.get_all_fields(&Self::key(provider, date)).await?;
            days.push(DailyUsage::from_fields(date, &fields));
        }
        Ok(days)
    }
}
