//! PDP orchestrator (C9, spec.md §4.9).
//!
//! Binds a `PdpConfig` (§4.11) plus a registered `AttributeBroker` into a
//! compiled [`Pdp`] that can be subscribed many times, once per incoming
//! subscription. Each `subscribe` call builds one `EvalCtx` (§5: "each
//! subscription owns one evaluation context"), derives the reactive decision flux
//! from the compiled voter tree, and wraps it in `DistinctUntilChanged` -- the one
//! place that wrapper is applied (§4.9/§5: "distinct-until-changed applies only to
//! the top-level PDP output, never inside").
//!
//! The trace stream runs parallel to the decision stream (§6) rather than nested
//! inside it: every time the decision flux re-emits, the voter tree is re-sampled
//! (`evaluate_node`) to produce the matching `TraceRecord`, recursing one level per
//! child the same way the source document nests policies/sets.

use std::time::Duration;

use warden_core::ast::CombiningMode;

use crate::attribute::AttributeBroker;
use crate::combining::combine_with_contributors;
use crate::compiler::expr::{CompileCtx, Compiled};
use crate::compiler::policy_set::{compile_document, algorithm_name, VoterNode};
use crate::decision::{AuthorizationDecision, Decision};
use crate::eval_ctx::{EvalCtx, Subscription};
use crate::flux::{DistinctUntilChanged, Flux, FluxSink};
use crate::function_broker::FunctionBroker;
use crate::trace::{TraceRecord, VoterIdentity, VoterKind};

/// A compiled PDP, ready to be subscribed against many subscriptions.
pub struct Pdp {
    root: VoterNode,
    configuration_id: String,
    default_attribute_timeout: Duration,
    teardown_grace: Duration,
    coverage_enabled: bool,
    attributes: AttributeBroker,
}

/// What `Pdp::subscribe` hands back: the distinct-until-changed decision flux plus
/// a parallel trace flux that re-samples on every decision change.
pub struct Subscribed {
    pub decisions: DistinctUntilChanged<AuthorizationDecision>,
    pub traces: Flux<TraceRecord>,
}

impl Pdp {
    /// Compile every top-level document under `config.algorithm` (the PDP's own
    /// implicit root combine, not itself a named `PolicySet` in the source) and
    /// bind `config.variables` as compile-time constants visible to every policy.
    pub fn compile(
        config: &crate::config::PdpConfig,
        broker: FunctionBroker,
        attributes: AttributeBroker,
        default_attribute_timeout: Duration,
        teardown_grace: Duration,
        coverage_enabled: bool,
    ) -> Result<Pdp, String> {
        if config.algorithm.mode == CombiningMode::First {
            return Err(
                "top-level algorithm.mode must not be FIRST (first-applicable is only valid on a nested policy set)".to_string(),
            );
        }

        let mut ctx = CompileCtx::new(broker);
        for (name, value) in &config.variables {
            ctx = ctx.with_var(name, Compiled::Const(value.clone()))?;
        }

        let children = config
            .policies
            .iter()
            .map(|doc| compile_document(doc, &ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let root = VoterNode::Set {
            identity: VoterIdentity {
                name: config.pdp_id.clone(),
                kind: VoterKind::Set,
                document_id: Some(config.configuration_id.clone()),
                algorithm: Some(algorithm_name(&config.algorithm)),
            },
            algorithm: config.algorithm,
            children,
        };

        Ok(Pdp { root, configuration_id: config.configuration_id.clone(), default_attribute_timeout, teardown_grace, coverage_enabled, attributes })
    }

    /// Bind one subscription and open its decision/trace flux pair.
    pub fn subscribe(&self, subscription: Subscription) -> Subscribed {
        let ctx = EvalCtx::new(
            subscription,
            self.configuration_id.clone(),
            self.default_attribute_timeout,
            self.attributes.clone(),
            self.teardown_grace,
            self.coverage_enabled,
        );

        let decision_flux = self.root.clone().into_voter().eval_stream(&ctx);
        let decisions = DistinctUntilChanged::new(decision_flux.clone());

        let (trace_sink, traces) = FluxSink::new(sample_trace(&self.root, &ctx));

        let root = self.root.clone();
        let mut watch = decision_flux;
        tokio::spawn(async move {
            while watch.changed().await.is_ok() {
                if trace_sink.subscriber_count() == 0 {
                    return;
                }
                trace_sink.emit(sample_trace(&root, &ctx));
            }
        });

        Subscribed { decisions, traces }
    }
}

/// Recursively sample the current decision at every node of the voter tree,
/// building the matching `TraceRecord` (§4.10). A `First`-algorithm set stops
/// evaluating children once one resolves to `PERMIT`/`DENY`, per §4.7; children
/// after that point are never invoked and get `TraceRecord::stub` so a consumer
/// can still see (and verify) the full declared order.
fn evaluate_node(node: &VoterNode, ctx: &EvalCtx) -> (AuthorizationDecision, TraceRecord) {
    match node {
        VoterNode::Leaf(named) => {
            let decision = named.voter.eval_pure_or_first(ctx);
            let trace = leaf_trace(named.identity.clone(), &decision);
            (decision, trace)
        }
        VoterNode::Set { identity, algorithm, children } => {
            let mut decisions = Vec::with_capacity(children.len());
            let mut traces = Vec::with_capacity(children.len());
            let mut settled = false;

            for child in children {
                if algorithm.mode == CombiningMode::First && settled {
                    traces.push(TraceRecord::stub(child.identity().clone()));
                    decisions.push(AuthorizationDecision::not_applicable());
                    continue;
                }
                let (decision, trace) = evaluate_node(child, ctx);
                settled = matches!(decision.decision, Decision::Permit | Decision::Deny);
                decisions.push(decision);
                traces.push(trace);
            }

            let (combined, _) = combine_with_contributors(*algorithm, &decisions);
            let trace = TraceRecord {
                decision: combined.decision,
                obligations: combined.obligations.clone(),
                advice: combined.advice.clone(),
                resource: combined.resource.clone(),
                voter: identity.clone(),
                outcome: combined.decision,
                contributing_votes: traces,
                errors: Vec::new(),
                attributes: Vec::new(),
                conditions: Vec::new(),
            };
            (combined, trace)
        }
    }
}

/// Walk the tree and fold in the subscription-wide attribute/condition log kept on
/// `ctx`'s `TraceCollector`. The collector accumulates for the life of the
/// subscription (§4.10), so every sample after the first only grows the
/// `attributes`/`conditions` lists on the root record; nested records never carry
/// them (see `leaf_trace`/`evaluate_node`).
fn sample_trace(root: &VoterNode, ctx: &EvalCtx) -> TraceRecord {
    let (decision, trace) = evaluate_node(root, ctx);
    let collector = ctx.trace().lock().unwrap().clone();
    collector.into_record(trace.voter, &decision, trace.outcome, trace.contributing_votes, trace.errors)
}

/// A leaf's own trace record carries no nested `contributing_votes` (it has no
/// children) and no `attributes`/`conditions` of its own -- those accumulate on
/// the subscription-wide `TraceCollector` (`EvalCtx::trace`) rather than being
/// partitioned per policy, so only the root caller that owns the collector
/// attaches them.
fn leaf_trace(identity: VoterIdentity, decision: &AuthorizationDecision) -> TraceRecord {
    TraceRecord {
        decision: decision.decision,
        obligations: decision.obligations.clone(),
        advice: decision.advice.clone(),
        resource: decision.resource.clone(),
        voter: identity,
        outcome: decision.decision,
        contributing_votes: Vec::new(),
        errors: Vec::new(),
        attributes: Vec::new(),
        conditions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PdpConfig;
    use std::fs;

    fn write_config(dir: &std::path::Path) {
        fs::write(
            dir.join("config.json"),
            r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"deny-overrides","variables":{}}"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn empty_permit_policy_decides_permit_with_no_trailing_emission() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path());
        fs::write(dir.path().join("p.warden"), "policy \"p\" permit").unwrap();

        let config = PdpConfig::load_dir(dir.path()).unwrap();
        let pdp = Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(1), Duration::ZERO, false).unwrap();

        let mut subscribed = pdp.subscribe(Subscription::empty());
        let first = subscribed.decisions.next().await.unwrap();
        assert_eq!(first.decision, Decision::Permit);
        assert_eq!(subscribed.traces.borrow().decision, Decision::Permit);
    }

    #[tokio::test]
    async fn deny_overrides_two_policies_picks_deny() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path());
        fs::write(dir.path().join("a.warden"), "policy \"a\" permit").unwrap();
        fs::write(dir.path().join("b.warden"), "policy \"b\" deny").unwrap();

        let config = PdpConfig::load_dir(dir.path()).unwrap();
        let pdp = Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(1), Duration::ZERO, false).unwrap();

        let mut subscribed = pdp.subscribe(Subscription::empty());
        let first = subscribed.decisions.next().await.unwrap();
        assert_eq!(first.decision, Decision::Deny);
        assert_eq!(subscribed.traces.borrow().contributing_votes.len(), 2);
    }

    #[tokio::test]
    async fn top_level_first_algorithm_is_rejected_at_compile_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"first-applicable","variables":{}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("p.warden"), "policy \"p\" permit").unwrap();

        let config = PdpConfig::load_dir(dir.path()).unwrap();
        let result = Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(1), Duration::ZERO, false);
        assert!(result.is_err());
    }
}
