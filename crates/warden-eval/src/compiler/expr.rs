//! Expression compiler (C4, spec.md §4.4).
//!
//! Lowers `ast::Expr` into a [`Compiled`] value: one of `Const`, `Pure`, or `Stream`.
//! The lattice `Const ≤ Pure ≤ Stream` (spec.md §3) is total -- every AST node
//! produces exactly one `Compiled` variant, and composition always joins to at
//! least the maximum of its operands' strata (testable property 4, "stratum
//! monotonicity"). Short-circuit evaluation (`&&`/`||`) is preserved across strata
//! by construction: the right operand's thunk is never invoked unless required.
//!
//! Grounded on `tenor-eval`'s `predicate::eval_pred` for the recursive-descent shape
//! (match over AST node, recurse into children, short-circuit `And`/`Or` without
//! evaluating the untaken branch) -- generalized here to classify strata at compile
//! time rather than evaluate eagerly.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::select_all;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use warden_core::ast::{BinOp, Expr, Literal};

use crate::attribute::AttributeFinderInvocation;
use crate::eval_ctx::EvalCtx;
use crate::flux::{Flux, FluxSink};
use crate::function_broker::FunctionBroker;
use crate::numeric;
use crate::value::Value;

/// The compile-time variable environment (spec.md §4.4: "variable reference ->
/// looked up in a compile-time vars map ... if Const, the reference is Const;
/// otherwise it is resubstituted"). Resubstitution means `Var("x")` compiles to a
/// *clone of the actual `Compiled` form* bound to `x`, not a runtime map lookup --
/// this is what lets a var bound to a `Stream` expression correctly propagate
/// `Stream` stratum to every place it's referenced.
#[derive(Clone)]
pub struct CompileCtx {
    pub broker: FunctionBroker,
    vars: HashMap<String, Compiled>,
}

const SUBSCRIPTION_FIELDS: [&str; 4] = ["subject", "action", "resource", "environment"];

impl CompileCtx {
    pub fn new(broker: FunctionBroker) -> Self {
        CompileCtx { broker, vars: HashMap::new() }
    }

    /// Bind a `VarDef`. Returns `Err` if `name` was already bound in this body
    /// (spec.md §4.5: "VarDef redefinition is a compile-time error").
    pub fn with_var(&self, name: &str, compiled: Compiled) -> Result<CompileCtx, String> {
        if self.vars.contains_key(name) {
            return Err(format!("variable '{}' is already defined in this policy body", name));
        }
        let mut ctx = self.clone();
        ctx.vars.insert(name.to_string(), compiled);
        Ok(ctx)
    }

    fn resolve_var(&self, name: &str) -> Compiled {
        if let Some(compiled) = self.vars.get(name) {
            return compiled.clone();
        }
        if SUBSCRIPTION_FIELDS.contains(&name) {
            let field = name.to_string();
            return Compiled::Pure(Arc::new(move |ctx| ctx.subscription_field(&field)));
        }
        Compiled::Const(Value::error(format!("undefined variable '{}'", name)))
    }
}

/// Compile-time classification of how an expression must be evaluated (§3/§4.4).
/// Ordering matters: `join` (via `Ord::max`) is how composition lifts strata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stratum {
    Const,
    Pure,
    Stream,
}

impl Stratum {
    pub fn join(self, other: Stratum) -> Stratum {
        self.max(other)
    }
}

pub(crate) type PureFn = Arc<dyn Fn(&EvalCtx) -> Value + Send + Sync>;
pub(crate) type StreamFn = Arc<dyn Fn(&EvalCtx) -> Flux<Value> + Send + Sync>;

/// One of the three compiled forms an expression lowers to (§3).
#[derive(Clone)]
pub enum Compiled {
    Const(Value),
    Pure(PureFn),
    Stream(StreamFn),
}

impl Compiled {
    pub fn stratum(&self) -> Stratum {
        match self {
            Compiled::Const(_) => Stratum::Const,
            Compiled::Pure(_) => Stratum::Pure,
            Compiled::Stream(_) => Stratum::Stream,
        }
    }

    /// Synchronous evaluation, valid only for `Const`/`Pure` forms. Callers must
    /// check `stratum()` first; evaluating a `Stream` form this way is a logic
    /// error in the caller (the body compiler never does it -- see `body.rs`).
    pub fn eval_pure(&self, ctx: &EvalCtx) -> Value {
        match self {
            Compiled::Const(v) => v.clone(),
            Compiled::Pure(f) => f(ctx),
            Compiled::Stream(_) => Value::error("internal error: evaluated a Stream form synchronously"),
        }
    }

    /// Materialize as a flux regardless of stratum. `Const`/`Pure` forms lift into
    /// a single-value flux that never re-emits.
    pub fn eval_stream(&self, ctx: &EvalCtx) -> Flux<Value> {
        match self {
            Compiled::Const(v) => {
                let (_sink, rx) = FluxSink::new(v.clone());
                rx
            }
            Compiled::Pure(f) => {
                let (_sink, rx) = FluxSink::new(f(ctx));
                rx
            }
            Compiled::Stream(s) => s(ctx),
        }
    }

    /// Lift a `Const`/`Pure` form to at least `Pure`: used when an operand under a
    /// `Stream`-join needs to be re-evaluated each time a sibling re-emits, without
    /// itself opening a subscription.
    pub(crate) fn as_pure_fn(&self) -> PureFn {
        match self {
            Compiled::Const(v) => {
                let v = v.clone();
                Arc::new(move |_ctx| v.clone())
            }
            Compiled::Pure(f) => f.clone(),
            Compiled::Stream(_) => unreachable!("as_pure_fn called on a Stream form"),
        }
    }
}

/// Compile an AST expression into its minimal `Compiled` form (§4.4).
pub fn compile_expr(expr: &Expr, ctx: &CompileCtx) -> Compiled {
    match expr {
        Expr::Literal(lit, _) => Compiled::Const(literal_value(lit)),

        Expr::ArrayLit(items, _) => {
            let compiled: Vec<Compiled> = items.iter().map(|e| compile_expr(e, ctx)).collect();
            join_array(compiled)
        }

        Expr::ObjectLit(fields, _) => {
            let compiled: Vec<(String, Compiled)> =
                fields.iter().map(|(k, e)| (k.clone(), compile_expr(e, ctx))).collect();
            join_object(compiled)
        }

        Expr::Var(name, _) => ctx.resolve_var(name),

        Expr::RelativeSelf(_) => Compiled::Pure(Arc::new(|rctx| rctx.relative_self())),
        Expr::RelativeKey(_) => Compiled::Pure(Arc::new(|rctx| rctx.relative_key())),

        Expr::FieldAccess(base, field, _) => {
            let base = compile_expr(base, ctx);
            let field = field.clone();
            lift_unary(base, move |v| field_access(&v, &field))
        }

        Expr::Index(base, index, _) => {
            let base = compile_expr(base, ctx);
            let index = compile_expr(index, ctx);
            lift_binary(base, index, |b, i| index_access(&b, &i))
        }

        Expr::Not(inner, _) => {
            let inner = compile_expr(inner, ctx);
            lift_unary(inner, |v| match v.truthy() {
                Value::Boolean(b) => Value::Boolean(!b),
                other => other,
            })
        }

        Expr::Neg(inner, _) => {
            let inner = compile_expr(inner, ctx);
            lift_unary(inner, |v| match v {
                Value::Number(d) => numeric::neg(d).map(Value::Number).unwrap_or_else(|| Value::error("numeric overflow")),
                other if other.is_error() => other,
                other => Value::error(format!("'-' requires Number, got {}", other.type_name())),
            })
        }

        Expr::BinaryOp(BinOp::And, lhs, rhs, _) => compile_and(lhs, rhs, ctx),
        Expr::BinaryOp(BinOp::Or, lhs, rhs, _) => compile_or(lhs, rhs, ctx),

        Expr::BinaryOp(op, lhs, rhs, _) => {
            let op = *op;
            let lhs = compile_expr(lhs, ctx);
            let rhs = compile_expr(rhs, ctx);
            lift_binary(lhs, rhs, move |a, b| apply_binop(op, &a, &b))
        }

        Expr::FunctionCall { library, name, args, .. } => {
            let library = library.clone();
            let name = name.clone();
            let broker = ctx.broker.clone();
            let compiled_args: Vec<Compiled> = args.iter().map(|a| compile_expr(a, ctx)).collect();
            join_call(compiled_args, move |values| broker.invoke(library.as_deref(), &name, &values))
        }

        Expr::AttributeAccess { entity, name, args, .. } => {
            let entity = entity.as_ref().map(|e| compile_expr(e, ctx));
            let name = name.clone();
            let compiled_args: Vec<Compiled> = args.iter().map(|a| compile_expr(a, ctx)).collect();
            compile_attribute_access(entity, name, compiled_args)
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Boolean(*b),
        Literal::Number(s) => Value::number_from_str(s),
        Literal::Text(s) => Value::text(s.clone()),
    }
}

fn field_access(v: &Value, field: &str) -> Value {
    match v {
        Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Undefined),
        Value::Error(..) => v.clone(),
        Value::Undefined => Value::Undefined,
        other => Value::error(format!("field access '.{}' requires Object, got {}", field, other.type_name())),
    }
}

fn index_access(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Error(..), _) => base.clone(),
        (_, Value::Error(..)) => index.clone(),
        (Value::Array(items), Value::Number(n)) => {
            let Some(i) = n.to_u64().and_then(|i| usize::try_from(i).ok()) else {
                return Value::error(format!("array index must be a non-negative integer, got {}", n));
            };
            items.get(i).cloned().unwrap_or(Value::Undefined)
        }
        (Value::Object(map), Value::Text(key)) => map.get(key).cloned().unwrap_or(Value::Undefined),
        (other, _) => Value::error(format!("indexing requires Array or Object, got {}", other.type_name())),
    }
}

/// Equality is total-inclusive of `Undefined` (§4.1: `undefined == undefined` is
/// `True`), but equality against any other type is `False` rather than an error --
/// this is the one comparison operator exempted from the usual type-mismatch rule.
fn apply_binop(op: BinOp, a: &Value, b: &Value) -> Value {
    if let BinOp::Eq | BinOp::Neq = op {
        let eq = a.deep_equals(b);
        return Value::Boolean(if op == BinOp::Eq { eq } else { !eq });
    }
    if a.is_error() {
        return a.clone();
    }
    if b.is_error() {
        return b.clone();
    }
    match op {
        BinOp::Add => numeric_or_concat(a, b, numeric::add),
        BinOp::Sub => numeric_binop(a, b, numeric::sub),
        BinOp::Mul => numeric_binop(a, b, numeric::mul),
        BinOp::Div => numeric_binop(a, b, numeric::div),
        BinOp::Mod => numeric_binop(a, b, numeric::rem),
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => compare(op, a, b),
        BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Neq => unreachable!("handled above"),
    }
}

fn numeric_binop(a: &Value, b: &Value, f: impl Fn(rust_decimal::Decimal, rust_decimal::Decimal) -> Option<rust_decimal::Decimal>) -> Value {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => f(*x, *y).map(Value::Number).unwrap_or_else(|| Value::error("numeric overflow or division by zero")),
        _ => Value::error(format!("arithmetic requires Number operands, got {} and {}", a.type_name(), b.type_name())),
    }
}

/// `+` additionally supports `Text + Text` concatenation (a common ABAC-language
/// convenience; spec.md §4.4 only specifies "arithmetic" generically for `+`).
fn numeric_or_concat(a: &Value, b: &Value, f: impl Fn(rust_decimal::Decimal, rust_decimal::Decimal) -> Option<rust_decimal::Decimal>) -> Value {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Value::text(format!("{}{}", x, y)),
        _ => numeric_binop(a, b, f),
    }
}

fn compare(op: BinOp, a: &Value, b: &Value) -> Value {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Value::error(format!("comparison requires Number operands, got {} and {}", a.type_name(), b.type_name()));
    };
    let ordering = numeric::compare(*x, *y);
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Lte => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Gte => ordering.is_ge(),
        _ => unreachable!(),
    };
    Value::Boolean(result)
}

/// `a && b`: short-circuit preserved across every stratum. If `a` is `Const(False)`
/// or `Const(Error)`, `b` is never compiled into the runtime path at all (testable
/// property 5 and 3: constant-folding soundness).
fn compile_and(lhs: &Expr, rhs: &Expr, ctx: &CompileCtx) -> Compiled {
    let lhs_c = compile_expr(lhs, ctx);
    if let Compiled::Const(v) = &lhs_c {
        match v.truthy() {
            Value::Boolean(false) => return Compiled::Const(Value::Boolean(false)),
            Value::Error(..) => return Compiled::Const(v.truthy()),
            _ => {}
        }
    }
    let rhs_c = compile_expr(rhs, ctx);
    let stratum = lhs_c.stratum().join(rhs_c.stratum());
    short_circuit(lhs_c, rhs_c, stratum, true)
}

fn compile_or(lhs: &Expr, rhs: &Expr, ctx: &CompileCtx) -> Compiled {
    let lhs_c = compile_expr(lhs, ctx);
    if let Compiled::Const(v) = &lhs_c {
        match v.truthy() {
            Value::Boolean(true) => return Compiled::Const(Value::Boolean(true)),
            Value::Error(..) => return Compiled::Const(v.truthy()),
            _ => {}
        }
    }
    let rhs_c = compile_expr(rhs, ctx);
    let stratum = lhs_c.stratum().join(rhs_c.stratum());
    short_circuit(lhs_c, rhs_c, stratum, false)
}

/// `shortcut_on`: the boolean value of `lhs.truthy()` that skips evaluating `rhs`
/// (`false` for `&&`, `true` for `||`). Exposed `pub(crate)` so `compiler::body` can
/// fold a statement sequence with the same short-circuit semantics.
pub(crate) fn short_circuit(lhs: Compiled, rhs: Compiled, stratum: Stratum, shortcut_on: bool) -> Compiled {
    match stratum {
        Stratum::Const => {
            let (Compiled::Const(a), Compiled::Const(b)) = (&lhs, &rhs) else { unreachable!() };
            Compiled::Const(eval_logical(a, b, shortcut_on))
        }
        Stratum::Pure => {
            let lf = lhs.as_pure_fn();
            let rf = rhs.as_pure_fn();
            Compiled::Pure(Arc::new(move |ctx| {
                let a = lf(ctx);
                match a.truthy() {
                    Value::Boolean(b) if b == shortcut_on => Value::Boolean(shortcut_on),
                    Value::Error(..) => a.truthy(),
                    _ => match rf(ctx).truthy() {
                        v @ Value::Boolean(_) => v,
                        other => other,
                    },
                }
            }))
        }
        Stratum::Stream => {
            // The streaming suffix (`body.rs`) is the only place that evaluates a
            // `Stream` compiled form; wrapping a logical op's stream form here
            // merges both operands' live fluxes and re-applies the short-circuit
            // rule on every re-emission (see `merge_stream_operands`).
            let operands = vec![lhs, rhs];
            Compiled::Stream(Arc::new(move |ctx| {
                merge_stream_operands(
                    &operands,
                    ctx,
                    Arc::new(move |vals: &[Value]| {
                        let a = vals[0].clone();
                        match a.truthy() {
                            Value::Boolean(b) if b == shortcut_on => Value::Boolean(shortcut_on),
                            Value::Error(..) => a.truthy(),
                            _ => match vals[1].clone().truthy() {
                                v @ Value::Boolean(_) => v,
                                other => other,
                            },
                        }
                    }),
                )
            }))
        }
    }
}

/// Fold a sequence of already-compiled conditions into one `True && c1 && c2 && ...`
/// short-circuit conjunction (spec.md §4.5 step 3/4). An empty sequence is `True`.
pub(crate) fn fold_and(items: Vec<Compiled>) -> Compiled {
    items.into_iter().fold(Compiled::Const(Value::Boolean(true)), |acc, item| {
        if let Compiled::Const(v) = &acc {
            match v.truthy() {
                Value::Boolean(false) => return acc,
                Value::Error(..) => return Compiled::Const(v.truthy()),
                _ => {}
            }
        }
        let stratum = acc.stratum().join(item.stratum());
        short_circuit(acc, item, stratum, true)
    })
}

fn eval_logical(a: &Value, b: &Value, shortcut_on: bool) -> Value {
    match a.truthy() {
        Value::Boolean(x) if x == shortcut_on => Value::Boolean(shortcut_on),
        Value::Error(..) => a.truthy(),
        _ => match b.truthy() {
            v @ Value::Boolean(_) => v,
            other => other,
        },
    }
}

impl Compiled {
    /// Best-effort synchronous read of a `Stream` operand's *current* value at
    /// composition time. Used by `compile_attribute_access` to sample an entity/
    /// argument operand when opening an attribute invocation, and by
    /// `compiler::policy`/`combining` to sample sibling operands each time one of
    /// them re-emits.
    pub(crate) fn eval_pure_or_first(&self, ctx: &EvalCtx) -> Value {
        match self {
            Compiled::Const(v) => v.clone(),
            Compiled::Pure(f) => f(ctx),
            Compiled::Stream(s) => s(ctx).borrow().clone(),
        }
    }
}

/// Subscribes to every operand's *live* flux via [`Compiled::eval_stream`] -- not a
/// one-shot snapshot -- and re-applies `recompute` to the latest values whenever
/// any operand re-emits, so a `Stream`-stratum composition stays reactive instead
/// of freezing at its first sample (spec.md §4.4/§4.5 step 4: "whenever any stream
/// operand re-emits, the suffix re-evaluates"). Mirrors `combining::stream_voter`'s
/// merge shape one level down (expression operands, not child voters).
fn merge_stream_operands(
    operands: &[Compiled],
    ctx: &EvalCtx,
    recompute: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
) -> Flux<Value> {
    let fluxes: Vec<Flux<Value>> = operands.iter().map(|c| c.eval_stream(ctx)).collect();
    let mut latest: Vec<Value> = fluxes.iter().map(|f| f.borrow().clone()).collect();

    let (sink, rx) = FluxSink::new(recompute(&latest));

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
            sink.emit(recompute(&latest));
        }
    });

    rx
}

fn lift_unary(inner: Compiled, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Compiled {
    match inner {
        Compiled::Const(v) => Compiled::Const(f(v)),
        Compiled::Pure(g) => Compiled::Pure(Arc::new(move |ctx| f(g(ctx)))),
        Compiled::Stream(g) => {
            let f = Arc::new(f);
            let operand = vec![Compiled::Stream(g)];
            Compiled::Stream(Arc::new(move |ctx| {
                let f = f.clone();
                merge_stream_operands(&operand, ctx, Arc::new(move |vals: &[Value]| f(vals[0].clone())))
            }))
        }
    }
}

fn lift_binary(a: Compiled, b: Compiled, f: impl Fn(Value, Value) -> Value + Send + Sync + 'static) -> Compiled {
    let stratum = a.stratum().join(b.stratum());
    match stratum {
        Stratum::Const => {
            let (Compiled::Const(av), Compiled::Const(bv)) = (a, b) else { unreachable!() };
            Compiled::Const(f(av, bv))
        }
        Stratum::Pure => {
            let af = a.as_pure_fn();
            let bf = b.as_pure_fn();
            Compiled::Pure(Arc::new(move |ctx| f(af(ctx), bf(ctx))))
        }
        Stratum::Stream => {
            let f = Arc::new(f);
            let operands = vec![a, b];
            Compiled::Stream(Arc::new(move |ctx| {
                let f = f.clone();
                merge_stream_operands(&operands, ctx, Arc::new(move |vals: &[Value]| f(vals[0].clone(), vals[1].clone())))
            }))
        }
    }
}

fn join_array(items: Vec<Compiled>) -> Compiled {
    let stratum = items.iter().fold(Stratum::Const, |acc, c| acc.join(c.stratum()));
    match stratum {
        Stratum::Const => {
            let values = items.into_iter().map(|c| match c { Compiled::Const(v) => v, _ => unreachable!() }).collect();
            Compiled::Const(Value::Array(values))
        }
        Stratum::Pure => {
            let fns: Vec<PureFn> = items.into_iter().map(|c| c.as_pure_fn()).collect();
            Compiled::Pure(Arc::new(move |ctx| Value::Array(fns.iter().map(|f| f(ctx)).collect())))
        }
        Stratum::Stream => Compiled::Stream(Arc::new(move |ctx| {
            merge_stream_operands(&items, ctx, Arc::new(|vals: &[Value]| Value::Array(vals.to_vec())))
        })),
    }
}

fn join_object(fields: Vec<(String, Compiled)>) -> Compiled {
    let stratum = fields.iter().fold(Stratum::Const, |acc, (_, c)| acc.join(c.stratum()));
    match stratum {
        Stratum::Const => {
            let map = fields
                .into_iter()
                .map(|(k, c)| match c { Compiled::Const(v) => (k, v), _ => unreachable!() })
                .collect();
            Compiled::Const(Value::Object(map))
        }
        Stratum::Pure => {
            let fns: Vec<(String, PureFn)> = fields.into_iter().map(|(k, c)| (k, c.as_pure_fn())).collect();
            Compiled::Pure(Arc::new(move |ctx| Value::Object(fns.iter().map(|(k, f)| (k.clone(), f(ctx))).collect())))
        }
        Stratum::Stream => {
            let keys: Arc<Vec<String>> = Arc::new(fields.iter().map(|(k, _)| k.clone()).collect());
            let operands: Vec<Compiled> = fields.into_iter().map(|(_, c)| c).collect();
            Compiled::Stream(Arc::new(move |ctx| {
                let keys = keys.clone();
                merge_stream_operands(
                    &operands,
                    ctx,
                    Arc::new(move |vals: &[Value]| Value::Object(keys.iter().cloned().zip(vals.iter().cloned()).collect())),
                )
            }))
        }
    }
}

fn join_call(args: Vec<Compiled>, call: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> Compiled {
    let stratum = args.iter().fold(Stratum::Const, |acc, c| acc.join(c.stratum()));
    match stratum {
        Stratum::Const => {
            let values = args.into_iter().map(|c| match c { Compiled::Const(v) => v, _ => unreachable!() }).collect();
            Compiled::Const(call(values))
        }
        Stratum::Pure => {
            let fns: Vec<PureFn> = args.into_iter().map(|c| c.as_pure_fn()).collect();
            let call = Arc::new(call);
            Compiled::Pure(Arc::new(move |ctx| call(fns.iter().map(|f| f(ctx)).collect())))
        }
        Stratum::Stream => {
            let call = Arc::new(call);
            Compiled::Stream(Arc::new(move |ctx| {
                let call = call.clone();
                merge_stream_operands(&args, ctx, Arc::new(move |vals: &[Value]| call(vals.to_vec())))
            }))
        }
    }
}

/// Attribute access is always `Stream` (§4.4), regardless of the strata of its
/// entity/argument operands -- it is the one AST node that unconditionally lifts
/// to the top of the lattice.
fn compile_attribute_access(entity: Option<Compiled>, name: String, args: Vec<Compiled>) -> Compiled {
    let entity = entity.map(Arc::new);
    let args = Arc::new(args);
    Compiled::Stream(Arc::new(move |ctx| {
        let entity_value = entity.as_ref().map(|e| e.eval_pure_or_first(ctx));
        let argument_values: Vec<Value> = args.iter().map(|c| c.eval_pure_or_first(ctx)).collect();

        let invocation = AttributeFinderInvocation {
            attribute_name: name.clone(),
            configuration_id: ctx.configuration_id().to_string(),
            is_environment_attribute: entity_value.is_none(),
            entity: entity_value,
            arguments: argument_values,
            fresh: false,
            initial_timeout: ctx.default_attribute_timeout(),
            poll_interval: None,
            backoff: None,
            retries: 0,
        };

        match ctx.open_attribute(&invocation) {
            Some(flux) => flux,
            None => {
                let (_sink, rx) = FluxSink::new(Value::error(crate::error::EvalError::UnknownAttribute(name.clone()).to_string()));
                rx
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval_ctx::EvalCtx;
    use warden_core::source::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::new("test.warden", 1, 0, 0)
    }

    fn num(s: &str) -> Expr {
        Expr::Literal(Literal::Number(s.to_string()), loc())
    }

    fn boolean(b: bool) -> Expr {
        Expr::Literal(Literal::Bool(b), loc())
    }

    fn binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::BinaryOp(op, Box::new(lhs), Box::new(rhs), loc())
    }

    fn compile_ctx() -> CompileCtx {
        CompileCtx::new(FunctionBroker::with_stdlib())
    }

    fn ctx() -> EvalCtx {
        EvalCtx::for_test()
    }

    #[test]
    fn literal_is_const() {
        let compiled = compile_expr(&boolean(true), &compile_ctx());
        assert_eq!(compiled.stratum(), Stratum::Const);
        assert_eq!(compiled.eval_pure(&ctx()), Value::Boolean(true));
    }

    #[test]
    fn short_circuit_and_does_not_compile_division_by_zero() {
        let rhs = binop(BinOp::Div, num("1"), num("0"));
        let expr = binop(BinOp::And, boolean(false), rhs);
        let compiled = compile_expr(&expr, &compile_ctx());
        assert_eq!(compiled.stratum(), Stratum::Const);
        assert_eq!(compiled.eval_pure(&ctx()), Value::Boolean(false));
    }

    #[test]
    fn division_by_zero_is_error_not_panic() {
        let expr = binop(BinOp::Div, num("1"), num("0"));
        let compiled = compile_expr(&expr, &compile_ctx());
        assert!(compiled.eval_pure(&ctx()).is_error());
    }

    #[test]
    fn equality_with_undefined_is_total_not_an_error() {
        let expr = binop(BinOp::Eq, Expr::Literal(Literal::Null, loc()), num("1"));
        let compiled = compile_expr(&expr, &compile_ctx());
        assert_eq!(compiled.eval_pure(&ctx()), Value::Boolean(false));
    }

    #[test]
    fn array_literal_joins_to_the_max_operand_stratum() {
        let expr = Expr::ArrayLit(vec![num("1"), num("2")], loc());
        let compiled = compile_expr(&expr, &compile_ctx());
        assert_eq!(compiled.stratum(), Stratum::Const);
    }

    #[test]
    fn var_def_resubstitutes_the_bound_compiled_form() {
        let cctx = compile_ctx().with_var("x", Compiled::Const(Value::Number(1.into()))).unwrap();
        let compiled = compile_expr(&Expr::Var("x".to_string(), loc()), &cctx);
        assert_eq!(compiled.stratum(), Stratum::Const);
        assert_eq!(compiled.eval_pure(&ctx()), Value::Number(1.into()));
    }

    #[test]
    fn redefining_a_var_is_rejected() {
        let cctx = compile_ctx().with_var("x", Compiled::Const(Value::Null)).unwrap();
        assert!(cctx.with_var("x", Compiled::Const(Value::Null)).is_err());
    }

    #[test]
    fn unbound_variable_compiles_to_a_const_error() {
        let compiled = compile_expr(&Expr::Var("nope".to_string(), loc()), &compile_ctx());
        assert!(matches!(compiled, Compiled::Const(Value::Error(..))));
    }

    /// A `Stream`-stratum attribute access composed inside `== true` must keep
    /// tracking the attribute's live value, not freeze at the first sample --
    /// regression test for a bug where every Stream combinator sampled its
    /// operands once via `eval_pure_or_first` and republished through a sink
    /// whose sender was dropped on the same statement.
    #[tokio::test]
    async fn composed_stream_expression_reemits_on_each_attribute_change() {
        use async_trait::async_trait;
        use std::time::Duration;
        use tokio::sync::watch;

        use crate::attribute::{AttributeBroker, AttributeFinderInvocation, AttributeSource};
        use crate::eval_ctx::Subscription;

        struct ManualAttributeSource {
            rx: Flux<Value>,
        }

        #[async_trait]
        impl AttributeSource for ManualAttributeSource {
            async fn open(&self, _invocation: &AttributeFinderInvocation) -> Flux<Value> {
                self.rx.clone()
            }
        }

        let (tx, rx) = watch::channel(Value::Boolean(true));
        let mut broker = AttributeBroker::new();
        broker.register("sensor.online", Arc::new(ManualAttributeSource { rx }));

        let eval_ctx = EvalCtx::new(
            Subscription::empty(),
            "cfg-1",
            Duration::from_secs(1),
            broker,
            Duration::ZERO,
            false,
        );

        let attribute_access = Expr::AttributeAccess {
            entity: Some(Box::new(Expr::Var("subject".to_string(), loc()))),
            name: "sensor.online".to_string(),
            args: Vec::new(),
            location: loc(),
        };
        let expr = binop(BinOp::Eq, attribute_access, boolean(true));
        let compiled = compile_expr(&expr, &compile_ctx());
        assert_eq!(compiled.stratum(), Stratum::Stream);

        let mut flux = compiled.eval_stream(&eval_ctx);
        assert_eq!(*flux.borrow(), Value::Boolean(true));

        tx.send_replace(Value::Boolean(false));
        flux.changed().await.unwrap();
        assert_eq!(*flux.borrow(), Value::Boolean(false));

        tx.send_replace(Value::Boolean(true));
        flux.changed().await.unwrap();
        assert_eq!(*flux.borrow(), Value::Boolean(true));
    }
}
