//! Provider Health Registry: static provider metadata plus one mutable
//! health flag per provider.
//!
//! Owned by `AiService` and shared with the engine through an `Arc`; there is
//! no global registry. Health is cleared on any failed call and only restored
//! by `reset_all`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::providers::AiProvider;

/// Immutable provider metadata, fixed at startup from configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Lower is tried first. Ties keep registration order.
    pub priority: i32,
    /// USD per 1000 estimated tokens.
    pub cost_per_unit: f64,
}

/// A provider handle as seen by the engine for one request.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub descriptor: ProviderDescriptor,
    pub provider: Arc<dyn AiProvider>,
}

/// Public view of one provider's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub priority: i32,
    pub cost_per_unit: f64,
    pub last_check: Option<DateTime<Utc>>,
}

struct ProviderSlot {
    descriptor: ProviderDescriptor,
    provider: Arc<dyn AiProvider>,
    healthy: AtomicBool,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl ProviderSlot {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *self.last_check.lock() = Some(Utc::now());
    }

    fn handle(&self) -> RegisteredProvider {
        RegisteredProvider {
            descriptor: self.descriptor.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

pub struct ProviderRegistry {
    /// Sorted ascending by priority, stable w.r.t. registration order.
    slots: Vec<ProviderSlot>,
}

impl ProviderRegistry {
    /// Builds the registry. Every provider starts healthy. A name registered
    /// twice keeps its first registration.
    pub fn new(entries: Vec<(ProviderDescriptor, Arc<dyn AiProvider>)>) -> Self {
        let mut slots: Vec<ProviderSlot> = Vec::with_capacity(entries.len());
        for (descriptor, provider) in entries {
            if slots.iter().any(|s| s.descriptor.name == descriptor.name) {
                warn!(
                    provider = %descriptor.name,
                    "Duplicate provider registration ignored"
                );
                continue;
            }
            slots.push(ProviderSlot {
                descriptor,
                provider,
                healthy: AtomicBool::new(true),
                last_check: Mutex::new(None),
            });
        }
        // sort_by_key is stable: equal priorities keep registration order.
        slots.sort_by_key(|s| s.descriptor.priority);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.descriptor.name.clone())
            .collect()
    }

    /// Every provider, ascending priority, regardless of health.
    pub fn list_by_priority(&self) -> Vec<RegisteredProvider> {
        self.slots.iter().map(ProviderSlot::handle).collect()
    }

    /// The subsequence of `list_by_priority` that is currently healthy.
    pub fn healthy(&self) -> Vec<RegisteredProvider> {
        self.slots
            .iter()
            .filter(|s| s.is_healthy())
            .map(ProviderSlot::handle)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredProvider> {
        self.slot(name).map(ProviderSlot::handle)
    }

    /// Idempotent; concurrent reports for the same provider are harmless.
    pub fn mark_unhealthy(&self, name: &str) {
        if let Some(slot) = self.slot(name) {
            let was_healthy = slot.healthy.swap(false, Ordering::AcqRel);
            slot.touch();
            if was_healthy {
                warn!(provider = %name, "Provider marked unhealthy");
            }
        }
    }

    /// Records a successful call. Does not restore health.
    pub fn record_success(&self, name: &str) {
        if let Some(slot) = self.slot(name) {
            slot.touch();
        }
    }

    pub fn reset_all(&self) {
        for slot in &self.slots {
            slot.healthy.store(true, Ordering::Release);
            slot.touch();
        }
        info!(providers = self.slots.len(), "Provider health reset");
    }

    /// Health of every provider keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, ProviderHealth> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.descriptor.name.clone(),
                    ProviderHealth {
                        healthy: s.is_healthy(),
                        priority: s.descriptor.priority,
                        cost_per_unit: s.descriptor.cost_per_unit,
                        last_check: *s.last_check.lock(),
                    },
                )
            })
            .collect()
    }

    fn slot(&self, name: &str) -> Option<&ProviderSlot> {
        self.slots.iter().find(|s| s.descriptor.name == name)
    }
}
