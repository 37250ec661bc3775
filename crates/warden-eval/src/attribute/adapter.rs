//! Concrete `AttributeSource` implementations (SPEC_FULL.md §4.3, ambient).
//!
//! Grounded on `tenor-eval`'s `StaticFactProvider` (`fact_provider.rs`): a trivial
//! always-available source useful for testing and for attributes whose value is
//! known at configuration time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time;

use super::{AttributeFinderInvocation, AttributeSource};
use crate::flux::Flux;
use crate::value::Value;

/// A source that publishes one fixed value and never changes it again. Mirrors
/// `StaticFactProvider`'s role: tests and attributes known ahead of time.
pub struct StaticAttributeSource {
    value: Value,
}

impl StaticAttributeSource {
    pub fn new(value: Value) -> Self {
        StaticAttributeSource { value }
    }
}

#[async_trait]
impl AttributeSource for StaticAttributeSource {
    async fn open(&self, _invocation: &AttributeFinderInvocation) -> Flux<Value> {
        let (_tx, rx) = watch::channel(self.value.clone());
        rx
    }
}

/// A source backed by an in-memory table, keyed by the invocation's first argument
/// (the entity id, by convention). Looking up a missing key publishes `Undefined`,
/// matching attribute-access's "unknown attribute is a hole, not a hard failure"
/// posture (spec.md §4.1/§7) for this illustrative adapter.
pub struct TableAttributeSource {
    table: HashMap<String, Value>,
}

impl TableAttributeSource {
    pub fn new(table: HashMap<String, Value>) -> Self {
        TableAttributeSource { table }
    }
}

#[async_trait]
impl AttributeSource for TableAttributeSource {
    async fn open(&self, invocation: &AttributeFinderInvocation) -> Flux<Value> {
        let key = invocation
            .arguments
            .first()
            .map(|v| v.to_json().to_string())
            .or_else(|| invocation.entity.as_ref().map(|v| v.to_json().to_string()))
            .unwrap_or_default();
        let value = self.table.get(&key).cloned().unwrap_or(Value::Undefined);
        let (_tx, rx) = watch::channel(value);
        rx
    }
}

/// A source that polls a fallible closure on an interval, publishing `Value::Error`
/// (rather than terminating the stream) when the closure errs. Grounded on spec.md
/// §4.3's "on source error, `Error(msg)` is emitted into the stream".
pub struct PollingAttributeSource {
    poll: Arc<dyn Fn() -> Result<Value, String> + Send + Sync>,
    interval: Duration,
}

impl PollingAttributeSource {
    pub fn new(
        interval: Duration,
        poll: impl Fn() -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        PollingAttributeSource { poll: Arc::new(poll), interval }
    }
}

#[async_trait]
impl AttributeSource for PollingAttributeSource {
    async fn open(&self, _invocation: &AttributeFinderInvocation) -> Flux<Value> {
        let initial = (self.poll)().unwrap_or_else(Value::error);
        let (tx, rx) = watch::channel(initial);
        let poll = self.poll.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    return;
                }
                let next = poll().unwrap_or_else(Value::error);
                tx.send_replace(next);
            }
        });
        rx
    }
}
