//! AST for the policy/set source language (spec.md §3, §6).
//!
//! This is the contract the rest of the workspace depends on: `warden-eval`'s
//! expression compiler (C4) walks `Expr`, the policy-body compiler (C5) walks
//! `Statement`, and the policy/policy-set compilers (C6/C8) walk `Policy`/`PolicySet`.

use serde::{Deserialize, Serialize};

use crate::source::SourceLocation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Kept as text; the evaluator parses it into `rust_decimal::Decimal`.
    Number(String),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

/// An expression node. Every variant carries the `SourceLocation` it was parsed from,
/// used for compile-error reporting and for the `@`/`#` forbidden-accessor check (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, SourceLocation),
    ArrayLit(Vec<Expr>, SourceLocation),
    ObjectLit(Vec<(String, Expr)>, SourceLocation),
    /// Reference to a `VarDef` bound earlier in the same body, or a subscription field
    /// (`subject`, `action`, `resource`, `environment`).
    Var(String, SourceLocation),
    FieldAccess(Box<Expr>, String, SourceLocation),
    Index(Box<Expr>, Box<Expr>, SourceLocation),
    /// `@` -- relative reference to the value under transform. Only legal inside `transform`.
    RelativeSelf(SourceLocation),
    /// `#` -- relative reference to the current object key under transform. Only legal inside `transform`.
    RelativeKey(SourceLocation),
    Not(Box<Expr>, SourceLocation),
    Neg(Box<Expr>, SourceLocation),
    BinaryOp(BinOp, Box<Expr>, Box<Expr>, SourceLocation),
    /// `library.function(args)`.
    FunctionCall {
        library: Option<String>,
        name: String,
        args: Vec<Expr>,
        location: SourceLocation,
    },
    /// `entity.<name(args)>` (entity-relative) or `<name(args)>` (environment form, entity = None).
    AttributeAccess {
        entity: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
        location: SourceLocation,
    },
}

impl Expr {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Expr::Literal(_, loc)
            | Expr::ArrayLit(_, loc)
            | Expr::ObjectLit(_, loc)
            | Expr::Var(_, loc)
            | Expr::FieldAccess(_, _, loc)
            | Expr::Index(_, _, loc)
            | Expr::RelativeSelf(loc)
            | Expr::RelativeKey(loc)
            | Expr::Not(_, loc)
            | Expr::Neg(_, loc)
            | Expr::BinaryOp(_, _, _, loc)
            | Expr::FunctionCall { location: loc, .. }
            | Expr::AttributeAccess { location: loc, .. } => loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    VarDef(String, Expr),
    Condition(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    Permit,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub entitlement: Entitlement,
    pub body: Vec<Statement>,
    pub obligations: Vec<Expr>,
    pub advice: Vec<Expr>,
    pub transform: Option<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombiningMode {
    PriorityDeny,
    PriorityPermit,
    Unique,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultDecision {
    Permit,
    Deny,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorHandling {
    Propagate,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombiningAlgorithm {
    pub mode: CombiningMode,
    pub default_decision: DefaultDecision,
    pub error_handling: ErrorHandling,
}

impl CombiningAlgorithm {
    /// Named algorithms, per spec.md §6 ("Algorithm names map one-to-one onto
    /// `{mode, defaultDecision, errorHandling}` triples").
    pub fn by_name(name: &str) -> Option<Self> {
        use CombiningMode::*;
        use DefaultDecision::*;
        use ErrorHandling::*;
        let (mode, default_decision, error_handling) = match name {
            "deny-overrides" => (PriorityDeny, Deny, Propagate),
            "permit-overrides" => (PriorityPermit, Permit, Propagate),
            "only-one-applicable" => (Unique, Abstain, Propagate),
            "first-applicable" => (First, Abstain, Propagate),
            "deny-unless-permit" => (PriorityPermit, Deny, Abstain),
            "permit-unless-deny" => (PriorityDeny, Permit, Abstain),
            _ => return None,
        };
        Some(CombiningAlgorithm { mode, default_decision, error_handling })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub name: String,
    pub algorithm: CombiningAlgorithm,
    pub children: Vec<Document>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Document {
    Policy(Policy),
    PolicySet(PolicySet),
}

impl Document {
    pub fn name(&self) -> &str {
        match self {
            Document::Policy(p) => &p.name,
            Document::PolicySet(s) => &s.name,
        }
    }
}
