use serde::{Deserialize, Serialize};

use crate::check::Check;

/// A persisted labor-law rule as owned by the backend.
///
/// The client never patches a `Rule` field by field: after every
/// successful mutation the local copy is replaced by the server's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub law_reference: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub effective_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<String>,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub penalty: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
}

/// Body of `POST /labor-law-rules` and `PUT /labor-law-rules/{rule_id}`.
///
/// `rule_id` is omitted on create so the backend assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInput {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule_id: String,
    pub name: String,
    pub law_reference: String,
    pub description: String,
    pub effective_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<String>,
    pub checks: Vec<Check>,
    #[serde(default)]
    pub penalty: Vec<String>,
}

impl RuleInput {
    /// The rule the backend would hold after accepting this input.
    pub fn into_rule(self, rule_id: impl Into<String>) -> Rule {
        Rule {
            rule_id: rule_id.into(),
            name: self.name,
            law_reference: self.law_reference,
            description: self.description,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            checks: self.checks,
            penalty: self.penalty,
            created_date: None,
            updated_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_from_backend_ignores_check_ids() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "rule_id": "overtime_125",
            "name": "Overtime 125%",
            "law_reference": "Hours of Work and Rest Law, s.16",
            "description": "First two overtime hours are paid at 125%",
            "effective_from": "2024-01-01",
            "checks": [{
                "id": "check_1",
                "condition": "attendance.overtime_hours > 0",
                "amount_owed": "0",
                "violation_message": "Underpaid"
            }],
            "penalty": ["fine"],
            "created_date": "2024-01-02T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(rule.checks.len(), 1);
        assert_eq!(rule.effective_to, None);
        assert_eq!(rule.updated_date, None);
    }

    #[test]
    fn test_create_input_omits_empty_rule_id() {
        let input = RuleInput {
            rule_id: String::new(),
            name: "Overtime".into(),
            law_reference: "s.16".into(),
            description: "Overtime pay".into(),
            effective_from: "2024-01-01".into(),
            effective_to: None,
            checks: vec![],
            penalty: vec![],
        };
        let body = serde_json::to_value(&input).unwrap();
        assert!(body.get("rule_id").is_none());
        assert!(body.get("effective_to").is_none());
    }
}
