//! `AuthorizationDecision` and the `Decision` enum (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

/// `{decision, obligations: Array, advice: Array, resource: Value|Undefined}` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationDecision {
    pub decision: Decision,
    pub obligations: Vec<Value>,
    pub advice: Vec<Value>,
    pub resource: Value,
}

impl AuthorizationDecision {
    pub fn new(decision: Decision) -> Self {
        AuthorizationDecision {
            decision,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::Undefined,
        }
    }

    pub fn indeterminate() -> Self {
        AuthorizationDecision::new(Decision::Indeterminate)
    }

    pub fn not_applicable() -> Self {
        AuthorizationDecision::new(Decision::NotApplicable)
    }

    /// Decision output JSON (§6: "Fields omitted when empty/undefined").
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("decision".to_string(), serde_json::to_value(self.decision).unwrap());
        if !self.obligations.is_empty() {
            map.insert(
                "obligations".to_string(),
                serde_json::Value::Array(self.obligations.iter().map(Value::to_json).collect()),
            );
        }
        if !self.advice.is_empty() {
            map.insert(
                "advice".to_string(),
                serde_json::Value::Array(self.advice.iter().map(Value::to_json).collect()),
            );
        }
        if !matches!(self.resource, Value::Undefined) {
            map.insert("resource".to_string(), self.resource.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_decision_omits_optional_fields() {
        let d = AuthorizationDecision::new(Decision::Permit);
        let json = d.to_json();
        assert_eq!(json, serde_json::json!({"decision": "PERMIT"}));
    }

    #[test]
    fn populated_decision_includes_all_fields() {
        let mut d = AuthorizationDecision::new(Decision::Deny);
        d.obligations.push(Value::text("block"));
        let json = d.to_json();
        assert_eq!(json["obligations"], serde_json::json!(["block"]));
    }
}
