//! Resolved PDP configuration (A2, SPEC_FULL.md §4.11).
//!
//! `warden_interchange::PdpConfig` is the wire/disk shape: policy *source text*,
//! an algorithm *name*, raw JSON variables -- exactly what §6 describes a PDP
//! configuration object as, and nothing `warden-eval` needs to understand to
//! serialize or transmit it. This module is the other half of that decoupling:
//! `PdpConfig::from_interchange` parses and resolves it into the AST/`Value`
//! forms `pdp::Pdp::compile` actually consumes. `PdpConfig::load_dir` is a second,
//! independent entry point for local development -- reading a directory of loose
//! `.warden` files the way `tenor-cli` reads a `.tenor` construct directory --
//! used by the CLI harness rather than the wire path.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use warden_core::ast::{CombiningAlgorithm, CombiningMode, Document};
use warden_core::error::ElabError;
use warden_core::loader::{self, LoadError};
use warden_core::parser::parse_document;
use warden_interchange::PdpConfig as InterchangeConfig;

use crate::value::Value;

pub struct PdpConfig {
    pub pdp_id: String,
    pub configuration_id: String,
    pub algorithm: CombiningAlgorithm,
    pub policies: Vec<Document>,
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading '{path}': {source}")]
    Io { path: String, source: std::io::Error },

    #[error("parsing '{path}': {source}")]
    Json { path: String, source: serde_json::Error },

    #[error("unknown combining algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("top-level algorithm.mode must not be FIRST (first-applicable is only valid on a nested policy set)")]
    TopLevelFirst,

    #[error(transparent)]
    Parse(#[from] ElabError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLocalConfig {
    pdp_id: String,
    configuration_id: String,
    algorithm: String,
    #[serde(default)]
    variables: HashMap<String, serde_json::Value>,
}

impl PdpConfig {
    /// Resolve the wire-shaped interchange config (§6) into AST/`Value` form:
    /// parse every `NamedSource`'s source text and resolve the algorithm name.
    pub fn from_interchange(config: &InterchangeConfig) -> Result<PdpConfig, ConfigError> {
        let algorithm = CombiningAlgorithm::by_name(&config.algorithm.0)
            .ok_or_else(|| ConfigError::UnknownAlgorithm(config.algorithm.0.clone()))?;
        if algorithm.mode == CombiningMode::First {
            return Err(ConfigError::TopLevelFirst);
        }

        let policies = config
            .policies
            .iter()
            .map(|named| Ok(parse_document(&named.source, &named.document_name)?))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let variables = config.variables.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect();

        Ok(PdpConfig {
            pdp_id: config.pdp_id.clone(),
            configuration_id: config.configuration_id.clone(),
            algorithm,
            policies,
            variables,
        })
    }

    /// Read `dir/config.json` (`{pdpId, configurationId, algorithm, variables}`)
    /// plus every sibling `dir/*.warden` file (§4.11). A local-development
    /// convenience the CLI harness uses; a real PDP deployment takes the
    /// interchange path instead.
    pub fn load_dir(dir: &Path) -> Result<PdpConfig, ConfigError> {
        let config_path = dir.join("config.json");
        let raw = fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::Io { path: config_path.display().to_string(), source: e })?;
        let raw: RawLocalConfig = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Json { path: config_path.display().to_string(), source: e })?;

        let algorithm = CombiningAlgorithm::by_name(&raw.algorithm)
            .ok_or_else(|| ConfigError::UnknownAlgorithm(raw.algorithm.clone()))?;
        if algorithm.mode == CombiningMode::First {
            return Err(ConfigError::TopLevelFirst);
        }

        let policies = loader::load_dir(dir)?;
        let variables = raw.variables.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect();

        Ok(PdpConfig { pdp_id: raw.pdp_id, configuration_id: raw.configuration_id, algorithm, policies, variables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use warden_interchange::{AlgorithmRef, NamedSource};

    #[test]
    fn loads_config_json_and_sibling_warden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"deny-overrides","variables":{"threshold":5}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("a.warden"), "policy \"a\" permit").unwrap();

        let config = PdpConfig::load_dir(dir.path()).unwrap();
        assert_eq!(config.pdp_id, "pdp-1");
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.variables["threshold"], Value::Number(5.into()));
    }

    #[test]
    fn rejects_an_unknown_algorithm_name_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"made-up","variables":{}}"#,
        )
        .unwrap();
        let err = PdpConfig::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlgorithm(_)));
    }

    #[test]
    fn resolves_an_interchange_config_by_parsing_its_source_text() {
        let interchange = InterchangeConfig {
            pdp_id: "pdp-1".into(),
            configuration_id: "cfg-1".into(),
            algorithm: AlgorithmRef("permit-overrides".into()),
            policies: vec![NamedSource { document_name: "p".into(), source: "policy \"p\" permit".into() }],
            variables: BTreeMap::new(),
        };
        let config = PdpConfig::from_interchange(&interchange).unwrap();
        assert_eq!(config.policies.len(), 1);
    }

    #[test]
    fn rejects_an_unknown_algorithm_name_from_an_interchange_config() {
        let interchange = InterchangeConfig {
            pdp_id: "pdp-1".into(),
            configuration_id: "cfg-1".into(),
            algorithm: AlgorithmRef("made-up".into()),
            policies: vec![],
            variables: BTreeMap::new(),
        };
        let err = PdpConfig::from_interchange(&interchange).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlgorithm(_)));
    }

    #[test]
    fn rejects_top_level_first_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"first-applicable","variables":{}}"#,
        )
        .unwrap();
        let err = PdpConfig::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TopLevelFirst));
    }

    #[test]
    fn rejects_top_level_first_from_an_interchange_config() {
        let interchange = InterchangeConfig {
            pdp_id: "pdp-1".into(),
            configuration_id: "cfg-1".into(),
            algorithm: AlgorithmRef("first-applicable".into()),
            policies: vec![],
            variables: BTreeMap::new(),
        };
        let err = PdpConfig::from_interchange(&interchange).unwrap_err();
        assert!(matches!(err, ConfigError::TopLevelFirst));
    }
}
