//! Detached side effects (cache writes, usage records).
//!
//! These never sit on a request's result path: failures are logged inside
//! the task and the caller has already returned. Handles are kept so that
//! shutdown (and tests) can wait for in-flight writes.

use std::fmt::Display;
use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn, Instrument, Span};

#[derive(Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` inside `span`; an `Err` is logged with the span's fields.
    pub fn spawn<F, E>(&self, span: Span, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handle = tokio::spawn(
            async move {
                if let Err(e) = task.await {
                    warn!("Detached task failed: {e}");
                }
            }
            .instrument(span),
        );

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Waits for every task spawned so far.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Detached task panicked: {e}");
            }
        }
    }
}
