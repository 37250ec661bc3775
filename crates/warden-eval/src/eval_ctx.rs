//! Runtime evaluation context (spec.md §5: "each subscription owns one evaluation
//! context, immutable after creation: subscription variables + references to
//! brokers + trace sink").
//!
//! One `EvalCtx` is built per subscription and threaded through every `Pure`/`Stream`
//! closure produced by the expression compiler. It is cheap to clone (everything
//! inside is `Arc`-backed) since attribute and trace access happen from many
//! concurrently-polled fluxes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::attribute::{AttributeBroker, AttributeFinderInvocation, SharedAttributeCache};
use crate::flux::Flux;
use crate::trace::TraceCollector;
use crate::value::Value;

/// The four subscription fields (spec.md §3/§6). Missing fields default to
/// `Undefined` per §6 ("Missing fields default to Undefined").
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub subject: Value,
    pub action: Value,
    pub resource: Value,
    pub environment: Value,
}

impl Subscription {
    pub fn empty() -> Self {
        Subscription { subject: Value::Undefined, action: Value::Undefined, resource: Value::Undefined, environment: Value::Undefined }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        let field = |name: &str| json.get(name).map(Value::from_json).unwrap_or(Value::Undefined);
        Subscription {
            subject: field("subject"),
            action: field("action"),
            resource: field("resource"),
            environment: field("environment"),
        }
    }
}

struct Brokers {
    attributes: AttributeBroker,
    cache: SharedAttributeCache,
}

/// Immutable-after-creation per-subscription context threaded through compiled
/// expressions. `relative_self` defaults to the subscription's `resource` field so a
/// policy's `transform` (the only place `@`/`#` compile-time-pass, §4.4/§4.6) sees
/// the resource it is rewriting without the policy compiler having to thread it
/// through separately; `with_relative` overrides both for nested transform forms.
#[derive(Clone)]
pub struct EvalCtx {
    subscription: Subscription,
    configuration_id: Arc<str>,
    default_attribute_timeout: Duration,
    brokers: Option<Arc<Brokers>>,
    relative_self: Option<Value>,
    relative_key: Option<Value>,
    trace: Arc<Mutex<TraceCollector>>,
}

impl EvalCtx {
    pub fn new(
        subscription: Subscription,
        configuration_id: impl Into<Arc<str>>,
        default_attribute_timeout: Duration,
        attributes: AttributeBroker,
        teardown_grace: Duration,
        coverage_enabled: bool,
    ) -> Self {
        let relative_self = Some(subscription.resource.clone());
        EvalCtx {
            subscription,
            configuration_id: configuration_id.into(),
            default_attribute_timeout,
            brokers: Some(Arc::new(Brokers { attributes, cache: SharedAttributeCache::new(teardown_grace) })),
            relative_self,
            relative_key: None,
            trace: Arc::new(Mutex::new(TraceCollector::new(coverage_enabled))),
        }
    }

    /// A context with no attribute broker wired up, for unit tests that only
    /// exercise `Const`/`Pure` compiled forms.
    #[cfg(test)]
    pub fn for_test() -> Self {
        EvalCtx {
            subscription: Subscription::empty(),
            configuration_id: Arc::from("test"),
            default_attribute_timeout: Duration::from_secs(1),
            brokers: None,
            relative_self: None,
            relative_key: None,
            trace: Arc::new(Mutex::new(TraceCollector::new(false))),
        }
    }

    pub fn configuration_id(&self) -> &str {
        &self.configuration_id
    }

    pub fn default_attribute_timeout(&self) -> Duration {
        self.default_attribute_timeout
    }

    pub fn relative_self(&self) -> Value {
        self.relative_self.clone().unwrap_or(Value::Undefined)
    }

    pub fn relative_key(&self) -> Value {
        self.relative_key.clone().unwrap_or(Value::Undefined)
    }

    /// A derived context for evaluating a `transform` expression over `self`/`key`
    /// (§4.6). Used only by the policy compiler.
    pub fn with_relative(&self, self_value: Value, key: Value) -> EvalCtx {
        let mut ctx = self.clone();
        ctx.relative_self = Some(self_value);
        ctx.relative_key = Some(key);
        ctx
    }

    /// Read one of the four subscription fields. `compiler::expr::CompileCtx`
    /// resolves `Var` references to either this (for `subject`/`action`/`resource`/
    /// `environment`) or a resubstituted compiled form (for a `VarDef`-bound name)
    /// at compile time, so this is the only variable-lookup path left at runtime.
    pub fn subscription_field(&self, name: &str) -> Value {
        match name {
            "subject" => self.subscription.subject.clone(),
            "action" => self.subscription.action.clone(),
            "resource" => self.subscription.resource.clone(),
            "environment" => self.subscription.environment.clone(),
            other => Value::error(format!("'{}' is not a subscription field", other)),
        }
    }

    /// Open (or reuse, via the shared cache) the flux for an attribute invocation.
    /// `None` if no source is registered for `invocation.attribute_name`.
    ///
    /// Bridges the broker's async API synchronously: every `AttributeSource` this
    /// crate ships (`attribute::adapter`) returns its `Flux` without actually
    /// suspending before doing so -- real I/O happens in a background task the
    /// source spawns, not before the handle is returned -- so blocking on the
    /// `open`/`subscribe` future here cannot deadlock. A source that genuinely
    /// needed to suspend before yielding a flux would need a different bridge.
    pub fn open_attribute(&self, invocation: &AttributeFinderInvocation) -> Option<Flux<Value>> {
        let brokers = self.brokers.as_ref()?;
        let source = brokers.attributes.get(&invocation.attribute_name)?;
        self.trace.lock().unwrap().record_attribute(&invocation.fingerprint(), &Value::Undefined);
        Some(futures::executor::block_on(brokers.cache.subscribe(source.as_ref(), invocation)))
    }

    pub fn trace(&self) -> Arc<Mutex<TraceCollector>> {
        self.trace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_subscription_fields_default_to_undefined() {
        let ctx = EvalCtx::for_test();
        assert_eq!(ctx.subscription_field("subject"), Value::Undefined);
    }

    #[test]
    fn relative_accessors_default_to_undefined_outside_transform() {
        let ctx = EvalCtx::for_test();
        assert_eq!(ctx.relative_self(), Value::Undefined);
        assert_eq!(ctx.relative_key(), Value::Undefined);
    }

    #[test]
    fn with_relative_sets_self_and_key_for_transform_evaluation() {
        let ctx = EvalCtx::for_test().with_relative(Value::Number(1.into()), Value::text("k"));
        assert_eq!(ctx.relative_self(), Value::Number(1.into()));
        assert_eq!(ctx.relative_key(), Value::text("k"));
    }
}
