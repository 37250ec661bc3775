//! Trace/coverage channel (C10, spec.md §4.10).
//!
//! Grounded on `tenor-eval`'s `ProvenanceCollector`/`VerdictProvenance`
//! (`provenance.rs`): a per-evaluation collector accumulates deduplicated
//! references during evaluation, and is only folded into a `TraceRecord` at
//! emission time -- so the hot path pays nothing when tracing is disabled
//! (spec.md §9, "trace as a side channel").

use serde::{Deserialize, Serialize};

use warden_core::source::SourceLocation;

use crate::decision::Decision;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub fingerprint: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionHit {
    pub location: Option<SourceLocation>,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterKind {
    Policy,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterIdentity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VoterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// A single trace record (§4.10). `contributing_votes` recurses one level per child
/// voter; `conditions` is only populated when coverage mode is enabled
/// (`TraceCollector::coverage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub decision: Decision,
    pub obligations: Vec<Value>,
    pub advice: Vec<Value>,
    pub resource: Value,
    pub voter: VoterIdentity,
    pub outcome: Decision,
    pub contributing_votes: Vec<TraceRecord>,
    pub errors: Vec<Value>,
    pub attributes: Vec<AttributeRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionHit>,
}

impl TraceRecord {
    /// Minimal stub trace for a policy that FIRST skipped without evaluating
    /// (spec.md §4.10: "Non-matching policies under FIRST produce a minimal stub
    /// trace so evaluators can later prove order was respected").
    pub fn stub(voter: VoterIdentity) -> Self {
        TraceRecord {
            decision: Decision::NotApplicable,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::Undefined,
            voter,
            outcome: Decision::NotApplicable,
            contributing_votes: Vec::new(),
            errors: Vec::new(),
            attributes: Vec::new(),
            conditions: Vec::new(),
        }
    }
}

/// Accumulates attribute/condition references during one evaluation. Cheap to
/// create per-emission; dedup happens on insert so repeated reads of the same
/// fingerprint within one evaluation don't inflate the trace.
#[derive(Debug, Clone, Default)]
pub struct TraceCollector {
    coverage_enabled: bool,
    attributes: Vec<AttributeRecord>,
    conditions: Vec<ConditionHit>,
}

impl TraceCollector {
    pub fn new(coverage_enabled: bool) -> Self {
        TraceCollector { coverage_enabled, attributes: Vec::new(), conditions: Vec::new() }
    }

    pub fn coverage_enabled(&self) -> bool {
        self.coverage_enabled
    }

    pub fn record_attribute(&mut self, fingerprint: &str, value: &Value) {
        if self.attributes.iter().any(|a| a.fingerprint == fingerprint) {
            return;
        }
        self.attributes.push(AttributeRecord { fingerprint: fingerprint.to_string(), value: value.clone() });
    }

    /// Only retained when `coverage_enabled`, so callers can skip the cost entirely
    /// on the minimal (non-coverage) pipeline.
    pub fn record_condition(&mut self, location: Option<SourceLocation>, matched: bool) {
        if !self.coverage_enabled {
            return;
        }
        self.conditions.push(ConditionHit { location, matched });
    }

    pub fn into_record(
        self,
        voter: VoterIdentity,
        decision: &crate::decision::AuthorizationDecision,
        outcome: Decision,
        contributing_votes: Vec<TraceRecord>,
        errors: Vec<Value>,
    ) -> TraceRecord {
        TraceRecord {
            decision: decision.decision,
            obligations: decision.obligations.clone(),
            advice: decision.advice.clone(),
            resource: decision.resource.clone(),
            voter,
            outcome,
            contributing_votes,
            errors,
            attributes: self.attributes,
            conditions: self.conditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_dedup_by_fingerprint() {
        let mut collector = TraceCollector::new(false);
        collector.record_attribute("fp1", &Value::Boolean(true));
        collector.record_attribute("fp1", &Value::Boolean(false));
        assert_eq!(collector.attributes.len(), 1);
    }

    #[test]
    fn conditions_are_dropped_when_coverage_disabled() {
        let mut collector = TraceCollector::new(false);
        collector.record_condition(None, true);
        assert!(collector.conditions.is_empty());
    }

    #[test]
    fn conditions_are_kept_when_coverage_enabled() {
        let mut collector = TraceCollector::new(true);
        collector.record_condition(None, true);
        assert_eq!(collector.conditions.len(), 1);
    }
}
