//! Combining-algorithm engine (C7, spec.md §4.7).
//!
//! A `CombiningEngine` holds an ordered list of child voters and an algorithm; it
//! reduces to a single [`Voter`] the same way the expression compiler reduces
//! operands to a single [`crate::compiler::expr::Compiled`] -- a tagged
//! `Static | Pure | Stream` variant (per the Design Notes guidance: "model as a
//! tagged variant `Voter = Static(Decision) | Pure(fn) | Stream(fn)` with explicit
//! dispatch; avoid open class hierarchies").
//!
//! `combine_with_contributors` is the pure reduction function used at every
//! stratum (and reused by `compiler::policy_set`/`pdp` to build trace records from
//! the same child-index bookkeeping).

use std::sync::Arc;

use futures::stream::select_all;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use warden_core::ast::{CombiningAlgorithm, CombiningMode, DefaultDecision, ErrorHandling};

use crate::compiler::expr::Stratum;
use crate::decision::{AuthorizationDecision, Decision};
use crate::eval_ctx::EvalCtx;
use crate::flux::{Flux, FluxSink};
use crate::trace::VoterIdentity;
use crate::value::Value;

pub type PureVote = Arc<dyn Fn(&EvalCtx) -> AuthorizationDecision + Send + Sync>;
pub type StreamVote = Arc<dyn Fn(&EvalCtx) -> Flux<AuthorizationDecision> + Send + Sync>;

/// One child (or the whole engine, once reduced) in the Static/Pure/Stream lattice.
#[derive(Clone)]
pub enum Voter {
    Static(AuthorizationDecision),
    Pure(PureVote),
    Stream(StreamVote),
}

impl Voter {
    pub fn stratum(&self) -> Stratum {
        match self {
            Voter::Static(_) => Stratum::Const,
            Voter::Pure(_) => Stratum::Pure,
            Voter::Stream(_) => Stratum::Stream,
        }
    }

    /// Valid for `Static`/`Pure` voters; a `Stream` voter evaluated this way
    /// degrades to its current value rather than panicking, mirroring
    /// `compiler::expr::Compiled::eval_pure_or_first`.
    pub fn eval_pure_or_first(&self, ctx: &EvalCtx) -> AuthorizationDecision {
        match self {
            Voter::Static(d) => d.clone(),
            Voter::Pure(f) => f(ctx),
            Voter::Stream(s) => s(ctx).borrow().clone(),
        }
    }

    pub fn eval_stream(&self, ctx: &EvalCtx) -> Flux<AuthorizationDecision> {
        match self {
            Voter::Static(d) => {
                let (_sink, rx) = FluxSink::new(d.clone());
                rx
            }
            Voter::Pure(f) => {
                let (_sink, rx) = FluxSink::new(f(ctx));
                rx
            }
            Voter::Stream(s) => s(ctx),
        }
    }
}

/// A child voter plus the identity the trace channel reports it under (§4.10).
#[derive(Clone)]
pub struct NamedVoter {
    pub identity: VoterIdentity,
    pub voter: Voter,
}

/// Reduces an ordered list of child voters under one [`CombiningAlgorithm`].
pub struct CombiningEngine {
    pub algorithm: CombiningAlgorithm,
    pub children: Vec<NamedVoter>,
}

impl CombiningEngine {
    pub fn new(algorithm: CombiningAlgorithm, children: Vec<NamedVoter>) -> Self {
        CombiningEngine { algorithm, children }
    }

    pub fn stratum(&self) -> Stratum {
        self.children.iter().fold(Stratum::Const, |acc, c| acc.join(c.voter.stratum()))
    }

    /// Reduce to a single `Voter` representing the whole engine (§4.8: "a set
    /// voter is streaming iff any child is streaming").
    pub fn into_voter(self) -> Voter {
        let algorithm = self.algorithm;
        match self.stratum() {
            Stratum::Const => {
                let decisions: Vec<AuthorizationDecision> = self
                    .children
                    .iter()
                    .map(|c| match &c.voter {
                        Voter::Static(d) => d.clone(),
                        _ => unreachable!("Const stratum implies every child is Static"),
                    })
                    .collect();
                Voter::Static(combine_with_contributors(algorithm, &decisions).0)
            }
            Stratum::Pure => {
                let children = self.children;
                Voter::Pure(Arc::new(move |ctx| {
                    let decisions: Vec<AuthorizationDecision> =
                        children.iter().map(|c| c.voter.eval_pure_or_first(ctx)).collect();
                    combine_with_contributors(algorithm, &decisions).0
                }))
            }
            Stratum::Stream => Voter::Stream(stream_voter(algorithm, self.children)),
        }
    }
}

/// Build the `Stream` voter: merges every child's flux (lifting `Static`/`Pure`
/// children into single-value fluxes the same way `Compiled::eval_stream` does),
/// recombining and republishing whenever any child re-emits. Per spec.md §5,
/// simultaneous child emissions from one underlying trigger must coalesce into one
/// combined emission -- `WatchStream`/`select_all` polls all children in one task
/// and emits once per poll iteration, which already gives that coalescing for
/// values that land in the same `tokio` wakeup.
fn stream_voter(algorithm: CombiningAlgorithm, children: Vec<NamedVoter>) -> StreamVote {
    Arc::new(move |ctx: &EvalCtx| {
        let fluxes: Vec<Flux<AuthorizationDecision>> =
            children.iter().map(|c| c.voter.eval_stream(ctx)).collect();
        let mut latest: Vec<AuthorizationDecision> = fluxes.iter().map(|f| f.borrow().clone()).collect();

        let (sink, rx) = FluxSink::new(combine_with_contributors(algorithm, &latest).0);

        let tagged = fluxes
            .into_iter()
            .enumerate()
            .map(|(i, f)| WatchStream::new(f).map(move |v| (i, v)))
            .collect::<Vec<_>>();
        let mut merged = select_all(tagged);

        tokio::spawn(async move {
            while let Some((i, v)) = merged.next().await {
                latest[i] = v;
                if sink.subscriber_count() == 0 {
                    return;
                }
                sink.emit(combine_with_contributors(algorithm, &latest).0);
            }
        });

        rx
    })
}

/// The pure reduction function (testable property 7: "deterministic combining").
/// Returns the combined decision plus the indices of the children that
/// contributed to it, so trace assembly (`compiler::policy_set`, `pdp`) can recover
/// `contributingVotes` from the same children list without recomputing the rule.
pub fn combine_with_contributors(
    algorithm: CombiningAlgorithm,
    decisions: &[AuthorizationDecision],
) -> (AuthorizationDecision, Vec<usize>) {
    let (decision, contributors) = match algorithm.mode {
        CombiningMode::PriorityDeny => priority_deny(decisions),
        CombiningMode::PriorityPermit => priority_permit(decisions),
        CombiningMode::Unique => unique(decisions),
        CombiningMode::First => first(decisions),
    };
    let combined = finalize(decision, algorithm);
    tracing::trace!(mode = ?algorithm.mode, decision = ?combined.decision, contributors = ?contributors, "combining decision taken");
    (combined, contributors)
}

fn indices_where(decisions: &[AuthorizationDecision], wanted: Decision) -> Vec<usize> {
    decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| d.decision == wanted)
        .map(|(i, _)| i)
        .collect()
}

fn aggregate(decision: Decision, indices: &[usize], decisions: &[AuthorizationDecision]) -> AuthorizationDecision {
    let mut out = AuthorizationDecision::new(decision);
    for &i in indices {
        out.obligations.extend(decisions[i].obligations.iter().cloned());
        out.advice.extend(decisions[i].advice.iter().cloned());
        if matches!(out.resource, Value::Undefined) && !matches!(decisions[i].resource, Value::Undefined) {
            out.resource = decisions[i].resource.clone();
        }
    }
    out
}

/// Deny-overrides: `DENY` wins outright; absent that, any `INDETERMINATE` acts as
/// an error wall even over a `PERMIT` (spec.md §4.7 -- the "safe" mode treats an
/// unresolved error as more dangerous than silently granting access).
fn priority_deny(decisions: &[AuthorizationDecision]) -> (AuthorizationDecision, Vec<usize>) {
    let denies = indices_where(decisions, Decision::Deny);
    if !denies.is_empty() {
        return (aggregate(Decision::Deny, &denies, decisions), denies);
    }
    let indeterminates = indices_where(decisions, Decision::Indeterminate);
    if !indeterminates.is_empty() {
        return (AuthorizationDecision::indeterminate(), indeterminates);
    }
    let permits = indices_where(decisions, Decision::Permit);
    if let Some(&i) = permits.first() {
        return (decisions[i].clone(), vec![i]);
    }
    (AuthorizationDecision::not_applicable(), Vec::new())
}

/// Permit-overrides: symmetric to `priority_deny`, but `INDETERMINATE` only blocks
/// the final `NOT_APPLICABLE` fallback -- a real `DENY` still wins over an error
/// when no `PERMIT` exists (spec.md §4.7: "INDETERMINATE blocks NOT_APPLICABLE only").
fn priority_permit(decisions: &[AuthorizationDecision]) -> (AuthorizationDecision, Vec<usize>) {
    let permits = indices_where(decisions, Decision::Permit);
    if !permits.is_empty() {
        return (aggregate(Decision::Permit, &permits, decisions), permits);
    }
    let denies = indices_where(decisions, Decision::Deny);
    if let Some(&i) = denies.first() {
        return (decisions[i].clone(), vec![i]);
    }
    let indeterminates = indices_where(decisions, Decision::Indeterminate);
    if !indeterminates.is_empty() {
        return (AuthorizationDecision::indeterminate(), indeterminates);
    }
    (AuthorizationDecision::not_applicable(), Vec::new())
}

fn unique(decisions: &[AuthorizationDecision]) -> (AuthorizationDecision, Vec<usize>) {
    let applicable: Vec<usize> = decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| matches!(d.decision, Decision::Permit | Decision::Deny))
        .map(|(i, _)| i)
        .collect();
    match applicable.len() {
        0 => (AuthorizationDecision::not_applicable(), Vec::new()),
        1 => (decisions[applicable[0]].clone(), applicable),
        _ => (AuthorizationDecision::indeterminate(), applicable),
    }
}

fn first(decisions: &[AuthorizationDecision]) -> (AuthorizationDecision, Vec<usize>) {
    match decisions.iter().position(|d| matches!(d.decision, Decision::Permit | Decision::Deny)) {
        Some(i) => (decisions[i].clone(), vec![i]),
        None => (AuthorizationDecision::not_applicable(), Vec::new()),
    }
}

fn finalize(mut decision: AuthorizationDecision, algorithm: CombiningAlgorithm) -> AuthorizationDecision {
    if decision.decision == Decision::NotApplicable {
        decision.decision = match algorithm.default_decision {
            DefaultDecision::Permit => Decision::Permit,
            DefaultDecision::Deny => Decision::Deny,
            DefaultDecision::Abstain => Decision::NotApplicable,
        };
    }
    if decision.decision == Decision::Indeterminate && algorithm.error_handling == ErrorHandling::Abstain {
        decision = AuthorizationDecision::not_applicable();
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn algo(mode: CombiningMode) -> CombiningAlgorithm {
        CombiningAlgorithm { mode, default_decision: DefaultDecision::Abstain, error_handling: ErrorHandling::Propagate }
    }

    fn d(decision: Decision) -> AuthorizationDecision {
        AuthorizationDecision::new(decision)
    }

    #[test]
    fn deny_overrides_prefers_deny_over_permit() {
        let decisions = vec![d(Decision::Permit), d(Decision::Deny)];
        let (out, contributors) = combine_with_contributors(algo(CombiningMode::PriorityDeny), &decisions);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(contributors, vec![1]);
    }

    #[test]
    fn deny_overrides_indeterminate_blocks_a_lone_permit() {
        let decisions = vec![d(Decision::Permit), d(Decision::Indeterminate)];
        let (out, _) = combine_with_contributors(algo(CombiningMode::PriorityDeny), &decisions);
        assert_eq!(out.decision, Decision::Indeterminate);
    }

    #[test]
    fn permit_overrides_indeterminate_does_not_block_a_real_deny() {
        let decisions = vec![d(Decision::Deny), d(Decision::Indeterminate)];
        let (out, _) = combine_with_contributors(algo(CombiningMode::PriorityPermit), &decisions);
        assert_eq!(out.decision, Decision::Deny);
    }

    #[test]
    fn unique_with_two_applicable_children_is_indeterminate() {
        let decisions = vec![d(Decision::Permit), d(Decision::Deny)];
        let (out, contributors) = combine_with_contributors(algo(CombiningMode::Unique), &decisions);
        assert_eq!(out.decision, Decision::Indeterminate);
        assert_eq!(contributors.len(), 2);
    }

    #[test]
    fn unique_with_one_applicable_child_passes_it_through() {
        let decisions = vec![d(Decision::NotApplicable), d(Decision::Deny)];
        let (out, contributors) = combine_with_contributors(algo(CombiningMode::Unique), &decisions);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(contributors, vec![1]);
    }

    #[test]
    fn first_applicable_takes_source_order() {
        let decisions = vec![d(Decision::NotApplicable), d(Decision::Permit), d(Decision::Deny)];
        let (out, contributors) = combine_with_contributors(algo(CombiningMode::First), &decisions);
        assert_eq!(out.decision, Decision::Permit);
        assert_eq!(contributors, vec![1]);
    }

    #[test]
    fn default_decision_substitutes_for_not_applicable() {
        let mut algorithm = algo(CombiningMode::First);
        algorithm.default_decision = DefaultDecision::Deny;
        let (out, _) = combine_with_contributors(algorithm, &[d(Decision::NotApplicable)]);
        assert_eq!(out.decision, Decision::Deny);
    }

    #[test]
    fn abstain_error_handling_hides_indeterminate_behind_not_applicable() {
        let mut algorithm = algo(CombiningMode::PriorityDeny);
        algorithm.error_handling = ErrorHandling::Abstain;
        let (out, _) = combine_with_contributors(algorithm, &[d(Decision::Indeterminate)]);
        assert_eq!(out.decision, Decision::NotApplicable);
    }

    #[tokio::test]
    async fn stream_voter_recombines_when_a_child_re_emits() {
        use crate::flux::FluxSink as Sink;
        let (child_sink, child_rx) = Sink::new(AuthorizationDecision::new(Decision::NotApplicable));
        let children = vec![
            NamedVoter {
                identity: VoterIdentity { name: "a".to_string(), kind: crate::trace::VoterKind::Policy, document_id: None, algorithm: None },
                voter: Voter::Stream(Arc::new(move |_ctx| child_rx.clone())),
            },
            NamedVoter {
                identity: VoterIdentity { name: "b".to_string(), kind: crate::trace::VoterKind::Policy, document_id: None, algorithm: None },
                voter: Voter::Static(AuthorizationDecision::new(Decision::NotApplicable)),
            },
        ];
        let engine = CombiningEngine::new(algo(CombiningMode::PriorityDeny), children);
        let voter = engine.into_voter();
        let mut flux = voter.eval_stream(&EvalCtx::for_test());
        assert_eq!(flux.borrow().decision, Decision::NotApplicable);

        child_sink.emit(AuthorizationDecision::new(Decision::Deny));
        flux.changed().await.unwrap();
        assert_eq!(flux.borrow().decision, Decision::Deny);
    }
}
