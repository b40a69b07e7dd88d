//! Deterministic rule-based policy evaluation.
//!
//! Evaluators are pure functions of a [`PolicyContext`]; first matching rule wins.

pub mod action_policy;
pub mod alert_policy;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use action_policy::{ActionPolicyConfig, ActionPolicyEvaluator};
pub use alert_policy::AlertPolicyEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyOutcome {
    Allow,
    Deny,
    Escalate,
}

/// Outcome plus the reason and the names of the rules that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub outcome: PolicyOutcome,
    pub reason: String,
    pub applied_rules: Vec<String>,
}

impl PolicyDecision {
    fn with(outcome: PolicyOutcome, reason: impl Into<String>, rules: &[&str]) -> Self {
        Self {
            outcome,
            reason: reason.into(),
            applied_rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn allow(reason: impl Into<String>, rules: &[&str]) -> Self {
        Self::with(PolicyOutcome::Allow, reason, rules)
    }

    pub fn deny(reason: impl Into<String>, rules: &[&str]) -> Self {
        Self::with(PolicyOutcome::Deny, reason, rules)
    }

    pub fn escalate(reason: impl Into<String>, rules: &[&str]) -> Self {
        Self::with(PolicyOutcome::Escalate, reason, rules)
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == PolicyOutcome::Allow
    }

    /// Applied rules joined with commas, as stored on the action row.
    pub fn joined_rules(&self) -> String {
        self.applied_rules.join(",")
    }
}

/// Action name, resource type and attributes an evaluator decides on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyContext {
    pub action: String,
    pub resource_type: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl PolicyContext {
    pub fn new(action: &str, resource_type: &str) -> Self {
        Self {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn bool_attr(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(|v| v.as_bool())
    }
}

/// A side-effect free evaluator for one policy action.
pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision;

    fn supports(&self, action: &str) -> bool;
}
