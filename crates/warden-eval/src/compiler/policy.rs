//! Policy compiler (C6, spec.md §4.6).
//!
//! Composes a [`CompiledBody`] (C5) with the policy's constraint slots
//! (`obligation`, `advice`, `transform`) into a single [`combining::Voter`] -- a
//! policy is a leaf in the combining tree, so it reduces to exactly the same
//! `Static | Pure | Stream` shape a policy *set* does (C8).
//!
//! The classification matrix (body stratum x worst-constraint stratum) falls out
//! for free: body and every constraint slot are just operands joined the same way
//! `compiler::expr::join_call` joins function-call arguments, so whichever stratum
//! the join lands on determines which `Voter` variant gets built.

use std::sync::Arc;

use futures::stream::select_all;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use warden_core::ast::{Entitlement, Expr, Policy, Statement};

use super::body::compile_body;
use super::expr::{compile_expr, CompileCtx, Compiled, Stratum};
use crate::combining::{NamedVoter, Voter};
use crate::decision::{AuthorizationDecision, Decision};
use crate::eval_ctx::EvalCtx;
use crate::flux::{Flux, FluxSink};
use crate::trace::{VoterIdentity, VoterKind};
use crate::value::Value;

/// Compile one `policy` document into a [`NamedVoter`] ready to sit in a
/// [`crate::combining::CombiningEngine`]'s child list.
pub fn compile_policy(policy: &Policy, ctx: &CompileCtx) -> Result<NamedVoter, String> {
    reject_relative_accessors_outside_transform(policy)?;

    let (compiled_body, body_ctx) = compile_body(&policy.body, ctx)?;
    let obligations: Vec<Compiled> = policy.obligations.iter().map(|e| compile_expr(e, &body_ctx)).collect();
    let advice: Vec<Compiled> = policy.advice.iter().map(|e| compile_expr(e, &body_ctx)).collect();
    let transform = policy.transform.as_ref().map(|e| compile_expr(e, &body_ctx));

    let shape = Shape { n_obligations: obligations.len(), n_advice: advice.len(), has_transform: transform.is_some() };
    let entitlement = policy.entitlement;

    let mut operands = vec![compiled_body.body];
    operands.extend(obligations);
    operands.extend(advice);
    operands.extend(transform);

    let stratum = operands.iter().fold(Stratum::Const, |acc, c| acc.join(c.stratum()));
    tracing::debug!(policy = %policy.name, stratum = ?stratum, "policy compiled");
    let voter = build_voter(entitlement, shape, operands, stratum);

    Ok(NamedVoter {
        identity: VoterIdentity { name: policy.name.clone(), kind: VoterKind::Policy, document_id: None, algorithm: None },
        voter,
    })
}

/// How many trailing operand slots are obligations/advice/transform, so `decide`
/// can unpack the flat operand-values vector back into its parts.
#[derive(Clone, Copy)]
struct Shape {
    n_obligations: usize,
    n_advice: usize,
    has_transform: bool,
}

/// Entitlement mapping + constraint semantics (§4.6): body `True` -> entitlement,
/// `False` -> `NOT_APPLICABLE`, `Error`/non-boolean -> `INDETERMINATE`. An erroring
/// obligation or transform escalates the whole decision to `INDETERMINATE`; an
/// erroring advice expression is kept as-is in the advice array.
fn decide(entitlement: Entitlement, shape: Shape, values: &[Value]) -> AuthorizationDecision {
    let (body_value, rest) = values.split_first().expect("operands always include the body");
    match body_value.truthy() {
        Value::Boolean(true) => {}
        Value::Boolean(false) => return AuthorizationDecision::not_applicable(),
        _ => return AuthorizationDecision::indeterminate(),
    }

    let mut out = AuthorizationDecision::new(match entitlement {
        Entitlement::Permit => Decision::Permit,
        Entitlement::Deny => Decision::Deny,
    });

    let (obligation_values, rest) = rest.split_at(shape.n_obligations);
    let (advice_values, rest) = rest.split_at(shape.n_advice);

    for v in obligation_values {
        if v.is_error() {
            return AuthorizationDecision::indeterminate();
        }
        out.obligations.push(v.clone());
    }
    out.advice.extend(advice_values.iter().cloned());

    if shape.has_transform {
        let transformed = &rest[0];
        if transformed.is_error() {
            return AuthorizationDecision::indeterminate();
        }
        out.resource = transformed.clone();
    }

    out
}

fn build_voter(entitlement: Entitlement, shape: Shape, operands: Vec<Compiled>, stratum: Stratum) -> Voter {
    match stratum {
        Stratum::Const => {
            let values: Vec<Value> =
                operands.into_iter().map(|c| match c { Compiled::Const(v) => v, _ => unreachable!() }).collect();
            Voter::Static(decide(entitlement, shape, &values))
        }
        Stratum::Pure => {
            let fns: Vec<_> = operands.into_iter().map(|c| c.as_pure_fn()).collect();
            Voter::Pure(Arc::new(move |ctx| {
                let values: Vec<Value> = fns.iter().map(|f| f(ctx)).collect();
                decide(entitlement, shape, &values)
            }))
        }
        Stratum::Stream => build_stream_voter(entitlement, shape, operands),
    }
}

/// Merges every `Stream`-stratum operand's flux (lifting `Const`/`Pure` operands
/// into single-value fluxes), recomputing `decide` whenever any re-emits. Mirrors
/// `combining::stream_voter`'s merge shape one level down (operands, not children).
fn build_stream_voter(entitlement: Entitlement, shape: Shape, operands: Vec<Compiled>) -> Voter {
    Voter::Stream(Arc::new(move |ctx: &EvalCtx| {
        let fluxes: Vec<Flux<Value>> = operands.iter().map(|c| c.eval_stream(ctx)).collect();
        let mut latest: Vec<Value> = fluxes.iter().map(|f| f.borrow().clone()).collect();

        let (sink, rx) = FluxSink::new(decide(entitlement, shape, &latest));

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
                sink.emit(decide(entitlement, shape, &latest));
            }
        });

        rx
    }))
}

/// `@`/`#` are only legal inside `transform` (§4.6): scan the body and the
/// obligation/advice expressions (everything except `transform` itself) and
/// reject at compile time if either appears.
fn reject_relative_accessors_outside_transform(policy: &Policy) -> Result<(), String> {
    let mut offending = policy.body.iter().flat_map(statement_exprs).chain(policy.obligations.iter()).chain(policy.advice.iter());
    if offending.any(contains_relative_accessor) {
        return Err(format!(
            "policy '{}': '@'/'#' relative accessors are only permitted inside transform",
            policy.name
        ));
    }
    Ok(())
}

fn statement_exprs(stmt: &Statement) -> Box<dyn Iterator<Item = &Expr> + '_> {
    match stmt {
        Statement::VarDef(_, e) | Statement::Condition(e) => Box::new(std::iter::once(e)),
    }
}

fn contains_relative_accessor(expr: &Expr) -> bool {
    match expr {
        Expr::RelativeSelf(_) | Expr::RelativeKey(_) => true,
        Expr::Literal(..) | Expr::Var(..) => false,
        Expr::ArrayLit(items, _) => items.iter().any(contains_relative_accessor),
        Expr::ObjectLit(fields, _) => fields.iter().any(|(_, e)| contains_relative_accessor(e)),
        Expr::FieldAccess(base, _, _) | Expr::Not(base, _) | Expr::Neg(base, _) => contains_relative_accessor(base),
        Expr::Index(base, index, _) => contains_relative_accessor(base) || contains_relative_accessor(index),
        Expr::BinaryOp(_, lhs, rhs, _) => contains_relative_accessor(lhs) || contains_relative_accessor(rhs),
        Expr::FunctionCall { args, .. } => args.iter().any(contains_relative_accessor),
        Expr::AttributeAccess { entity, args, .. } => {
            entity.as_deref().map(contains_relative_accessor).unwrap_or(false) || args.iter().any(contains_relative_accessor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_broker::FunctionBroker;
    use warden_core::source::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::new("test.warden", 1, 0, 0)
    }

    fn compile_ctx() -> CompileCtx {
        CompileCtx::new(FunctionBroker::with_stdlib())
    }

    fn bare_policy(entitlement: Entitlement, body: Vec<Statement>) -> Policy {
        Policy { name: "p".to_string(), entitlement, body, obligations: Vec::new(), advice: Vec::new(), transform: None, location: loc() }
    }

    #[test]
    fn empty_permit_policy_is_a_static_permit() {
        let policy = bare_policy(Entitlement::Permit, Vec::new());
        let named = compile_policy(&policy, &compile_ctx()).unwrap();
        assert!(matches!(named.voter, Voter::Static(ref d) if d.decision == Decision::Permit));
    }

    #[test]
    fn false_body_is_not_applicable() {
        let policy = bare_policy(Entitlement::Deny, vec![Statement::Condition(Expr::Literal(warden_core::ast::Literal::Bool(false), loc()))]);
        let named = compile_policy(&policy, &compile_ctx()).unwrap();
        assert!(matches!(named.voter, Voter::Static(ref d) if d.decision == Decision::NotApplicable));
    }

    #[test]
    fn erroring_body_is_indeterminate() {
        let bad_div = Expr::BinaryOp(
            warden_core::ast::BinOp::Div,
            Box::new(Expr::Literal(warden_core::ast::Literal::Number("1".to_string()), loc())),
            Box::new(Expr::Literal(warden_core::ast::Literal::Number("0".to_string()), loc())),
            loc(),
        );
        let policy = bare_policy(Entitlement::Permit, vec![Statement::Condition(bad_div)]);
        let named = compile_policy(&policy, &compile_ctx()).unwrap();
        assert!(matches!(named.voter, Voter::Static(ref d) if d.decision == Decision::Indeterminate));
    }

    #[test]
    fn erroring_obligation_escalates_to_indeterminate() {
        let mut policy = bare_policy(Entitlement::Deny, Vec::new());
        policy.obligations.push(Expr::BinaryOp(
            warden_core::ast::BinOp::Div,
            Box::new(Expr::Literal(warden_core::ast::Literal::Number("1".to_string()), loc())),
            Box::new(Expr::Literal(warden_core::ast::Literal::Number("0".to_string()), loc())),
            loc(),
        ));
        let named = compile_policy(&policy, &compile_ctx()).unwrap();
        assert!(matches!(named.voter, Voter::Static(ref d) if d.decision == Decision::Indeterminate));
    }

    #[test]
    fn transform_replaces_the_outbound_resource() {
        let mut policy = bare_policy(Entitlement::Permit, Vec::new());
        policy.transform = Some(Expr::RelativeSelf(loc()));
        let named = compile_policy(&policy, &compile_ctx()).unwrap();
        match named.voter {
            Voter::Pure(f) => {
                let ctx = EvalCtx::for_test().with_relative(Value::text("resource-value"), Value::Undefined);
                let decision = f(&ctx);
                assert_eq!(decision.resource, Value::text("resource-value"));
            }
            _ => panic!("expected a Pure voter (transform reads relative_self)"),
        }
    }

    #[test]
    fn relative_self_outside_transform_is_a_compile_error() {
        let policy = bare_policy(Entitlement::Permit, vec![Statement::Condition(Expr::RelativeSelf(loc()))]);
        assert!(compile_policy(&policy, &compile_ctx()).is_err());
    }
}
