//! In-process fan-out of dispatch outcomes.
//!
//! Observers run synchronously, in registration order. A failing or
//! panicking observer is logged and skipped; it never affects the pipeline
//! or the observers after it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;

use crate::error::ObserverError;
use crate::types::{Headers, RecordId};

/// Summary emitted once per dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeEvent {
    pub provider: String,
    pub topic: String,
    pub record_id: RecordId,
    /// Set when the handler failed.
    pub error: Option<String>,
}

impl OutcomeEvent {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Full delivery broadcast for custom providers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomDelivery {
    pub name: String,
    pub event: String,
    pub record_id: RecordId,
    pub payload: serde_json::Value,
    pub headers: Headers,
}

pub trait OutcomeObserver: Send + Sync {
    fn on_outcome(&self, event: &OutcomeEvent) -> Result<(), ObserverError>;
}

pub trait CustomObserver: Send + Sync {
    fn on_custom(&self, delivery: &CustomDelivery) -> Result<(), ObserverError>;
}

#[derive(Default, Clone)]
pub struct OutcomeNotifier {
    outcome_observers: Vec<Arc<dyn OutcomeObserver>>,
    custom_observers: Vec<Arc<dyn CustomObserver>>,
}

impl OutcomeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.outcome_observers.push(observer);
        self
    }

    pub fn subscribe_custom(mut self, observer: Arc<dyn CustomObserver>) -> Self {
        self.custom_observers.push(observer);
        self
    }

    /// Returns how many observers completed without error.
    pub fn notify(&self, event: &OutcomeEvent) -> usize {
        let mut delivered = 0;
        for (index, observer) in self.outcome_observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_outcome(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => tracing::warn!(
                    observer = index,
                    record_id = %event.record_id,
                    error = %err,
                    "outcome observer failed"
                ),
                Err(_) => tracing::warn!(
                    observer = index,
                    record_id = %event.record_id,
                    "outcome observer panicked"
                ),
            }
        }
        delivered
    }

    pub fn notify_custom(&self, delivery: &CustomDelivery) -> usize {
        let mut delivered = 0;
        for (index, observer) in self.custom_observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_custom(delivery))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => tracing::warn!(
                    observer = index,
                    record_id = %delivery.record_id,
                    error = %err,
                    "custom observer failed"
                ),
                Err(_) => tracing::warn!(
                    observer = index,
                    record_id = %delivery.record_id,
                    "custom observer panicked"
                ),
            }
        }
        delivered
    }
}

/// Observer that keeps every event it sees. Useful for audits and tests.
#[derive(Default)]
pub struct CollectingObserver {
    outcomes: std::sync::Mutex<Vec<OutcomeEvent>>,
    custom: std::sync::Mutex<Vec<CustomDelivery>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<OutcomeEvent> {
        self.outcomes.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn custom_deliveries(&self) -> Vec<CustomDelivery> {
        self.custom.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl OutcomeObserver for CollectingObserver {
    fn on_outcome(&self, event: &OutcomeEvent) -> Result<(), ObserverError> {
        self.outcomes
            .lock()
            .map_err(|_| "collector poisoned")?
            .push(event.clone());
        Ok(())
    }
}

impl CustomObserver for CollectingObserver {
    fn on_custom(&self, delivery: &CustomDelivery) -> Result<(), ObserverError> {
        self.custom
            .lock()
            .map_err(|_| "collector poisoned")?
            .push(delivery.clone());
        Ok(())
    }
}
