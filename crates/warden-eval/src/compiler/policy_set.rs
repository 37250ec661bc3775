//! Policy-set compiler (C8, spec.md §4.8).
//!
//! A `PolicySet` recurses: each child `Document` compiles independently (a
//! `Policy` via `compiler::policy::compile_policy`, a nested `PolicySet` via this
//! same module) into a [`VoterNode`] -- a tree that mirrors the source document
//! shape one-to-one. `VoterNode::into_voter` collapses it down to a single
//! [`Voter`] the same way `CombiningEngine::into_voter` collapses one level (§4.8:
//! "a set voter is streaming iff any child is streaming"); `pdp::evaluate_node`
//! instead walks the tree directly, preserving per-child decisions so it can build
//! the nested trace record §4.10 asks for.

use warden_core::ast::{CombiningAlgorithm, Document, PolicySet};

use super::expr::CompileCtx;
use super::policy::compile_policy;
use crate::combining::{CombiningEngine, NamedVoter, Voter};
use crate::trace::{VoterIdentity, VoterKind};

/// The compiled form of one document (policy or set), kept as a tree rather than
/// immediately collapsed so trace assembly can recurse over the same shape the
/// source had.
#[derive(Clone)]
pub enum VoterNode {
    Leaf(NamedVoter),
    Set { identity: VoterIdentity, algorithm: CombiningAlgorithm, children: Vec<VoterNode> },
}

impl VoterNode {
    pub fn identity(&self) -> &VoterIdentity {
        match self {
            VoterNode::Leaf(named) => &named.identity,
            VoterNode::Set { identity, .. } => identity,
        }
    }

    /// Collapse into one evaluable `Voter`. Once collapsed, individual children's
    /// decisions can no longer be recovered -- use this for the "just give me the
    /// decision" path; `pdp::evaluate_node` walks the uncollapsed tree instead.
    pub fn into_voter(self) -> Voter {
        match self {
            VoterNode::Leaf(named) => named.voter,
            VoterNode::Set { algorithm, children, .. } => {
                let named: Vec<NamedVoter> = children
                    .into_iter()
                    .map(|child| {
                        let identity = child.identity().clone();
                        NamedVoter { identity, voter: child.into_voter() }
                    })
                    .collect();
                CombiningEngine::new(algorithm, named).into_voter()
            }
        }
    }
}

pub fn compile_policy_set(policy_set: &PolicySet, ctx: &CompileCtx) -> Result<VoterNode, String> {
    let children = policy_set
        .children
        .iter()
        .map(|child| compile_document(child, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VoterNode::Set {
        identity: VoterIdentity {
            name: policy_set.name.clone(),
            kind: VoterKind::Set,
            document_id: None,
            algorithm: Some(algorithm_name(&policy_set.algorithm)),
        },
        algorithm: policy_set.algorithm,
        children,
    })
}

pub fn compile_document(document: &Document, ctx: &CompileCtx) -> Result<VoterNode, String> {
    match document {
        Document::Policy(policy) => Ok(VoterNode::Leaf(compile_policy(policy, ctx)?)),
        Document::PolicySet(set) => compile_policy_set(set, ctx),
    }
}

/// Reverses `CombiningAlgorithm::by_name` for the trace channel (§4.10: a set's
/// `VoterIdentity.algorithm` reports the name it was declared with). Falls back to
/// the raw triple for a `{mode, defaultDecision, errorHandling}` combination that
/// doesn't match one of the named algorithms.
pub(crate) fn algorithm_name(algorithm: &CombiningAlgorithm) -> String {
    use warden_core::ast::{CombiningMode::*, DefaultDecision::*, ErrorHandling::*};
    let name = match (algorithm.mode, algorithm.default_decision, algorithm.error_handling) {
        (PriorityDeny, Deny, Propagate) => "deny-overrides",
        (PriorityPermit, Permit, Propagate) => "permit-overrides",
        (Unique, Abstain, Propagate) => "only-one-applicable",
        (First, Abstain, Propagate) => "first-applicable",
        (PriorityPermit, Deny, Abstain) => "deny-unless-permit",
        (PriorityDeny, Permit, Abstain) => "permit-unless-deny",
        _ => {
            return format!(
                "{:?}/{:?}/{:?}",
                algorithm.mode, algorithm.default_decision, algorithm.error_handling
            )
        }
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::function_broker::FunctionBroker;
    use warden_core::ast::{DefaultDecision, Entitlement, ErrorHandling, Policy};
    use warden_core::source::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::new("test.warden", 1, 0, 0)
    }

    fn deny_overrides() -> CombiningAlgorithm {
        CombiningAlgorithm::by_name("deny-overrides").unwrap()
    }

    fn policy(name: &str, entitlement: Entitlement) -> Policy {
        Policy { name: name.to_string(), entitlement, body: Vec::new(), obligations: Vec::new(), advice: Vec::new(), transform: None, location: loc() }
    }

    fn compile_ctx() -> CompileCtx {
        CompileCtx::new(FunctionBroker::with_stdlib())
    }

    #[test]
    fn flat_set_of_two_policies_reduces_to_the_deny() {
        let set = PolicySet {
            name: "top".to_string(),
            algorithm: deny_overrides(),
            children: vec![
                Document::Policy(policy("permit-it", Entitlement::Permit)),
                Document::Policy(policy("deny-it", Entitlement::Deny)),
            ],
            location: loc(),
        };
        let node = compile_policy_set(&set, &compile_ctx()).unwrap();
        assert_eq!(node.identity().algorithm.as_deref(), Some("deny-overrides"));
        match node.into_voter() {
            Voter::Static(d) => assert_eq!(d.decision, Decision::Deny),
            _ => panic!("expected a Static voter (both children are Const)"),
        }
    }

    #[test]
    fn nested_set_recurses() {
        let inner = PolicySet {
            name: "inner".to_string(),
            algorithm: deny_overrides(),
            children: vec![Document::Policy(policy("deny-it", Entitlement::Deny))],
            location: loc(),
        };
        let outer = PolicySet {
            name: "outer".to_string(),
            algorithm: CombiningAlgorithm { mode: warden_core::ast::CombiningMode::First, default_decision: DefaultDecision::Abstain, error_handling: ErrorHandling::Propagate },
            children: vec![Document::PolicySet(inner)],
            location: loc(),
        };
        let node = compile_policy_set(&outer, &compile_ctx()).unwrap();
        match node.into_voter() {
            Voter::Static(d) => assert_eq!(d.decision, Decision::Deny),
            _ => panic!("expected a Static voter"),
        }
    }

    #[test]
    fn unnamed_algorithm_combination_falls_back_to_a_descriptive_string() {
        let set = PolicySet {
            name: "top".to_string(),
            algorithm: CombiningAlgorithm { mode: warden_core::ast::CombiningMode::Unique, default_decision: DefaultDecision::Deny, error_handling: ErrorHandling::Propagate },
            children: vec![Document::Policy(policy("p", Entitlement::Permit))],
            location: loc(),
        };
        let node = compile_policy_set(&set, &compile_ctx()).unwrap();
        assert!(node.identity().algorithm.clone().unwrap().contains("Unique"));
    }
}
