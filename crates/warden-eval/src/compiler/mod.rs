//! Compile-time pipeline: expressions (C4) -> policy bodies (C5) -> policies (C6)
//! -> policy sets (C8). Each stage consumes the AST produced by `warden-core` and
//! produces `Compiled`/`Voter` forms classified into the Const/Pure/Stream lattice
//! (spec.md §4.2) -- nothing in this module touches a live subscription.

pub mod body;
pub mod expr;
pub mod policy;
pub mod policy_set;
