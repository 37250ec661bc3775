//! Interchange types for a PDP configuration (spec.md §6).
//!
//! These structs decouple `warden-core` (AST + parser) from `warden-eval`
//! (compiler + runtime) the way `tenor-interchange` decouples `tenor-core` from
//! `tenor-eval`: a `PdpConfig` is a plain, serializable description of what to
//! compile, carrying policy *source text* rather than AST, so it can be written
//! to or read from disk/network without either crate knowing about the other's
//! internal types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `{pdpId, configurationId, algorithm, policies: [source strings], variables}` (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdpConfig {
    pub pdp_id: String,
    pub configuration_id: String,
    pub algorithm: AlgorithmRef,
    /// Source text of each top-level policy or policy-set document, in the order
    /// they participate in the root combining algorithm (§4.7 "lexical order of
    /// the source list").
    pub policies: Vec<NamedSource>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// A named reference to a combining algorithm, by its §6 algorithm name
/// (resolved to a `{mode, defaultDecision, errorHandling}` triple by
/// `warden_core::ast::CombiningAlgorithm::by_name`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlgorithmRef(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedSource {
    pub document_name: String,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let config = PdpConfig {
            pdp_id: "pdp-1".into(),
            configuration_id: "cfg-1".into(),
            algorithm: AlgorithmRef("deny-overrides".into()),
            policies: vec![NamedSource {
                document_name: "p.warden".into(),
                source: "policy \"p\" permit".into(),
            }],
            variables: BTreeMap::new(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PdpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
