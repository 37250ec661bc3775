//! Attribute broker (C3, spec.md §4.3).
//!
//! Two-level abstraction mirrored on `tenor-eval`'s `FactProvider`/`AdapterRegistry`
//! split: an [`AttributeSource`] is the per-attribute factory (async, may open a
//! long-lived stream), registered into an [`AttributeBroker`]; a [`SharedAttributeCache`]
//! sits in front of it so that two invocations with identical fingerprints within one
//! subscription share the same underlying flux rather than opening the source twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time;

use crate::flux::Flux;
use crate::value::Value;

pub mod adapter;

/// The fingerprint identifying a single attribute subscription (§3/§4.3). Two
/// invocations with an identical fingerprint, within the same subscription, are
/// backed by the same underlying flux.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFinderInvocation {
    pub attribute_name: String,
    pub configuration_id: String,
    pub is_environment_attribute: bool,
    pub entity: Option<Value>,
    pub arguments: Vec<Value>,
    pub fresh: bool,
    pub initial_timeout: Duration,
    pub poll_interval: Option<Duration>,
    pub backoff: Option<Duration>,
    pub retries: u32,
}

impl AttributeFinderInvocation {
    /// A stable cache key. Durations are intentionally part of the key: two
    /// invocations that differ only in poll interval are, per spec, distinct
    /// fingerprints and must not share a source.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:?}|{:?}|{}|{:?}|{:?}|{:?}|{}",
            self.attribute_name,
            self.configuration_id,
            self.is_environment_attribute,
            self.entity,
            self.arguments,
            self.fresh,
            self.initial_timeout,
            self.poll_interval,
            self.backoff,
            self.retries,
        )
    }
}

/// The per-attribute factory. Implementations open whatever they need (a poll loop,
/// a subscription to an external system, a static lookup) and publish into the
/// returned flux. A source that fails must emit `Value::Error(..)` into the flux
/// rather than returning an `Err` from a later poll -- per spec.md §4.3, the stream
/// itself never terminates abnormally on a source error.
#[async_trait]
pub trait AttributeSource: Send + Sync {
    async fn open(&self, invocation: &AttributeFinderInvocation) -> Flux<Value>;
}

struct CacheEntry {
    flux: Flux<Value>,
    refcount: usize,
}

/// Fingerprint-keyed sharing layer in front of the registered sources. Kept as a
/// separate type from `AttributeBroker` (rather than folded into `AttributeSource`)
/// so sources stay simple factories and all sharing/teardown policy lives in one
/// place, matching the separation `tenor-eval` keeps between `FactAdapter` and
/// `AdapterRegistry`.
pub struct SharedAttributeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    teardown_grace: Duration,
}

impl SharedAttributeCache {
    pub fn new(teardown_grace: Duration) -> Self {
        SharedAttributeCache { entries: Mutex::new(HashMap::new()), teardown_grace }
    }

    /// Subscribe to the flux for `invocation`, opening it via `source` on first use
    /// and reusing the cached flux (replaying its last value) on subsequent calls
    /// with the same fingerprint.
    pub async fn subscribe(
        &self,
        source: &dyn AttributeSource,
        invocation: &AttributeFinderInvocation,
    ) -> Flux<Value> {
        let fp = invocation.fingerprint();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&fp) {
            entry.refcount += 1;
            return entry.flux.clone();
        }

        let flux = source.open(invocation).await;
        tracing::debug!(attribute = %invocation.attribute_name, fingerprint = %fp, "attribute fingerprint opened");
        let entry = CacheEntry { flux: flux.clone(), refcount: 1 };
        entries.insert(fp, entry);
        flux
    }

    /// Release one subscriber's hold on `fingerprint`. When the refcount reaches
    /// zero the entry is torn down after `teardown_grace` has elapsed, giving a
    /// fast resubscription a chance to reuse the source instead of reopening it.
    pub async fn unsubscribe(&self, fingerprint: &str) {
        {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(fingerprint) else { return };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                return;
            }
        }

        if !self.teardown_grace.is_zero() {
            time::sleep(self.teardown_grace).await;
        }

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(fingerprint) {
            if entry.refcount == 0 {
                entries.remove(fingerprint);
                tracing::debug!(fingerprint = %fingerprint, "attribute fingerprint closed");
            }
        }
    }

    #[cfg(test)]
    async fn live_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Registry mapping attribute names to their [`AttributeSource`] (§4.3). Cheap to
/// clone (an `Arc` per source) so one broker can be shared across the many
/// per-subscription `EvalCtx`s a PDP creates.
#[derive(Default, Clone)]
pub struct AttributeBroker {
    sources: HashMap<String, Arc<dyn AttributeSource>>,
}

impl AttributeBroker {
    pub fn new() -> Self {
        AttributeBroker { sources: HashMap::new() }
    }

    pub fn register(&mut self, attribute_name: impl Into<String>, source: Arc<dyn AttributeSource>) {
        self.sources.insert(attribute_name.into(), source);
    }

    pub fn get(&self, attribute_name: &str) -> Option<Arc<dyn AttributeSource>> {
        self.sources.get(attribute_name).cloned()
    }

    pub fn contains(&self, attribute_name: &str) -> bool {
        self.sources.contains_key(attribute_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::adapter::StaticAttributeSource;

    fn invocation(name: &str) -> AttributeFinderInvocation {
        AttributeFinderInvocation {
            attribute_name: name.to_string(),
            configuration_id: "cfg-1".to_string(),
            is_environment_attribute: false,
            entity: None,
            arguments: Vec::new(),
            fresh: false,
            initial_timeout: Duration::from_secs(1),
            poll_interval: None,
            backoff: None,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn two_invocations_with_identical_fingerprints_share_one_cache_entry() {
        let cache = SharedAttributeCache::new(Duration::ZERO);
        let source = StaticAttributeSource::new(Value::Boolean(true));

        let inv = invocation("risk.level");
        let _a = cache.subscribe(&source, &inv).await;
        let _b = cache.subscribe(&source, &inv).await;
        assert_eq!(cache.live_count().await, 1);
    }

    #[tokio::test]
    async fn late_subscriber_replays_the_cached_value() {
        let cache = SharedAttributeCache::new(Duration::ZERO);
        let source = StaticAttributeSource::new(Value::text("active"));
        let inv = invocation("account.status");

        let flux = cache.subscribe(&source, &inv).await;
        assert_eq!(*flux.borrow(), Value::text("active"));
    }

    #[tokio::test]
    async fn entry_is_torn_down_after_last_subscriber_releases() {
        let cache = SharedAttributeCache::new(Duration::ZERO);
        let source = StaticAttributeSource::new(Value::Null);
        let inv = invocation("x");

        cache.subscribe(&source, &inv).await;
        cache.unsubscribe(&inv.fingerprint()).await;
        assert_eq!(cache.live_count().await, 0);
    }
}
