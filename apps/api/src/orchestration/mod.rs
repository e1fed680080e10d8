// AI provider orchestration: cache → health-ordered failover → usage metering.
// `handlers` is the only axum-facing part; everything else is transport-agnostic.

pub mod background;
pub mod cache;
pub mod engine;
pub mod handlers;
pub mod registry;
pub mod service;
pub mod usage;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use service::{AiService, AiSettings};

/// A logical AI operation. The name feeds cache fingerprints and is the
/// per-operation counter field in usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Analysis,
    Suggestions,
    Matching,
}

impl Operation {
    pub const ALL: [Operation; 3] = [
        Operation::Analysis,
        Operation::Suggestions,
        Operation::Matching,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Analysis => "analysis",
            Operation::Suggestions => "suggestions",
            Operation::Matching => "matching",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed provider attempt, kept for the terminal error and the logs.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub error: String,
}

/// The only orchestration failures a caller ever sees.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("All AI providers exhausted for {operation} after {} attempt(s)", .attempts.len())]
    AllProvidersExhausted {
        operation: Operation,
        attempts: Vec<ProviderAttempt>,
    },

    #[error("Unknown AI provider: {0}")]
    UnknownProvider(String),
}
