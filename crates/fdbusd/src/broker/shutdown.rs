//! Cooperative cancellation and the outcome of orderly shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::BrokerError;

/// Clonable request to stop the reactor loop.
///
/// The loop observes the token once per readiness wait, so shutdown latency
/// is bounded by the poll interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Failures collected while tearing the broker down.
///
/// Every cleanup step runs regardless of earlier failures; each failure is
/// recorded here instead of aborting the sequence.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    failures: Vec<BrokerError>,
}

impl ShutdownReport {
    pub(super) fn record(&mut self, outcome: Result<(), BrokerError>) {
        if let Err(error) = outcome {
            self.failures.push(error);
        }
    }

    /// Whether every cleanup step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failed cleanup steps in the order they ran.
    #[must_use]
    pub fn failures(&self) -> &[BrokerError] {
        &self.failures
    }
}
