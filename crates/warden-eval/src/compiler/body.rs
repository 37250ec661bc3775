//! Policy-body compiler (C5, spec.md §4.5).
//!
//! Takes a `where`-clause's statement sequence and folds it into one `Compiled`
//! value representing the body's truth: `True && c1 && c2 && ...`, preserving
//! short-circuit evaluation and the `Const ≤ Pure ≤ Stream` lattice the same way
//! a single `&&` expression does (`compiler::expr::fold_and`). `VarDef`s are folded
//! into the `CompileCtx` as they're encountered, in source order, so a later
//! condition (or a constraint slot compiled afterwards) can reference them.
//!
//! Grounded on `tenor-eval`'s `rules::eval_strata`/`eval_rule` shape: a statement
//! sequence evaluated in order, short-circuiting on the first falsy condition,
//! with a collector recording what was actually touched (here, condition hits
//! via `TraceCollector::record_condition` rather than fact/verdict ids).

use std::sync::Arc;

use warden_core::ast::Statement;
use warden_core::source::SourceLocation;

use super::expr::{compile_expr, fold_and, CompileCtx, Compiled};
use crate::eval_ctx::EvalCtx;
use crate::value::Value;

/// The compiled form of one `where`-clause, plus the `CompileCtx` advanced past all
/// of its `VarDef`s (so the policy compiler can reuse it for `obligation`/`advice`/
/// `transform` expressions, which may reference the same variables).
pub struct CompiledBody {
    pub body: Compiled,
}

/// Compile a statement sequence. `VarDef` redefinition surfaces as `Err` (spec.md
/// §4.5); an empty body compiles to `Compiled::Const(Boolean(true))`.
pub fn compile_body(statements: &[Statement], ctx: &CompileCtx) -> Result<(CompiledBody, CompileCtx), String> {
    let mut ctx = ctx.clone();
    let mut conditions: Vec<Compiled> = Vec::new();

    for stmt in statements {
        match stmt {
            Statement::VarDef(name, expr) => {
                let compiled = compile_expr(expr, &ctx);
                ctx = ctx.with_var(name, compiled)?;
            }
            Statement::Condition(expr) => {
                let compiled = compile_expr(expr, &ctx);
                conditions.push(instrument_condition(compiled, expr.location().clone()));
            }
        }
    }

    // Everything before the first Stream-stratum condition is the pure prefix
    // (§4.5 step 2); the first Stream condition and everything after it is the
    // streaming suffix, folded and short-circuited against the prefix exactly as
    // `fold_and`/`short_circuit` already do for a plain `&&` chain.
    let split_at = conditions
        .iter()
        .position(|c| c.stratum() == super::expr::Stratum::Stream)
        .unwrap_or(conditions.len());
    let (prefix, suffix) = conditions.split_at(split_at);

    let is_applicable = fold_and(prefix.to_vec());
    let body = if suffix.is_empty() {
        is_applicable
    } else {
        let suffix_compiled = fold_and(suffix.to_vec());
        let stratum = is_applicable.stratum().join(suffix_compiled.stratum());
        super::expr::short_circuit(is_applicable, suffix_compiled, stratum, true)
    };

    Ok((CompiledBody { body }, ctx))
}

/// Wrap a condition's compiled form so every evaluation records a `ConditionHit`
/// (no-op unless `TraceCollector::coverage_enabled`). A `Const` condition is
/// promoted to `Pure` here -- it needs to observe the per-subscription trace sink
/// to record itself, which a context-free `Const` cannot do.
fn instrument_condition(compiled: Compiled, location: SourceLocation) -> Compiled {
    let record = move |ctx: &EvalCtx, value: &Value| {
        let matched = value.as_bool().unwrap_or(false);
        ctx.trace().lock().unwrap().record_condition(Some(location.clone()), matched);
    };

    match compiled {
        Compiled::Const(v) => Compiled::Pure(Arc::new(move |ctx| {
            record(ctx, &v);
            v.clone()
        })),
        Compiled::Pure(f) => Compiled::Pure(Arc::new(move |ctx| {
            let v = f(ctx);
            record(ctx, &v);
            v
        })),
        Compiled::Stream(f) => Compiled::Stream(Arc::new(move |ctx| {
            let flux = f(ctx);
            record(ctx, &flux.borrow());
            flux
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_broker::FunctionBroker;
    use warden_core::ast::{BinOp, Expr, Literal};

    fn loc() -> SourceLocation {
        SourceLocation::new("test.warden", 1, 0, 0)
    }

    fn boolean(b: bool) -> Expr {
        Expr::Literal(Literal::Bool(b), loc())
    }

    fn compile_ctx() -> CompileCtx {
        CompileCtx::new(FunctionBroker::with_stdlib())
    }

    #[test]
    fn empty_body_is_const_true() {
        let (compiled, _) = compile_body(&[], &compile_ctx()).unwrap();
        assert!(matches!(compiled.body, Compiled::Const(Value::Boolean(true))));
    }

    #[test]
    fn var_def_is_visible_to_a_later_condition() {
        let stmts = vec![
            Statement::VarDef("x".to_string(), boolean(true)),
            Statement::Condition(Expr::Var("x".to_string(), loc())),
        ];
        let (compiled, _) = compile_body(&stmts, &compile_ctx()).unwrap();
        assert_eq!(compiled.body.eval_pure(&EvalCtx::for_test()), Value::Boolean(true));
    }

    #[test]
    fn redefining_a_var_in_the_body_is_a_compile_error() {
        let stmts = vec![
            Statement::VarDef("x".to_string(), boolean(true)),
            Statement::VarDef("x".to_string(), boolean(false)),
        ];
        assert!(compile_body(&stmts, &compile_ctx()).is_err());
    }

    #[test]
    fn short_circuit_false_condition_stops_before_a_division_by_zero() {
        let div_by_zero = Expr::BinaryOp(
            BinOp::Div,
            Box::new(Expr::Literal(Literal::Number("1".to_string()), loc())),
            Box::new(Expr::Literal(Literal::Number("0".to_string()), loc())),
            loc(),
        );
        let stmts = vec![Statement::Condition(boolean(false)), Statement::Condition(div_by_zero)];
        let (compiled, _) = compile_body(&stmts, &compile_ctx()).unwrap();
        assert_eq!(compiled.body.eval_pure(&EvalCtx::for_test()), Value::Boolean(false));
    }

    #[test]
    fn an_error_condition_makes_the_whole_body_an_error() {
        let stmts = vec![Statement::Condition(Expr::Literal(Literal::Number("not-a-number!".to_string()), loc()))];
        let (compiled, _) = compile_body(&stmts, &compile_ctx()).unwrap();
        assert!(compiled.body.eval_pure(&EvalCtx::for_test()).is_error());
    }
}
