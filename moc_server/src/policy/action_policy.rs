//! Action guardrail policy (`propose_action`).

use std::collections::BTreeSet;

use super::{PolicyContext, PolicyDecision, PolicyEngine};

pub const PROPOSE_ACTION: &str = "propose_action";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPolicyConfig {
    pub tool_allowlist: BTreeSet<String>,
    pub max_scaling_limit: i64,
    pub rollback_requires_approval: bool,
}

impl Default for ActionPolicyConfig {
    fn default() -> Self {
        Self {
            tool_allowlist: parse_allowlist("logs,metrics,deploy,topology"),
            max_scaling_limit: 10,
            rollback_requires_approval: true,
        }
    }
}

/// Split a CSV allowlist, dropping blanks.
pub fn parse_allowlist(csv: &str) -> BTreeSet<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ActionPolicyEvaluator {
    config: ActionPolicyConfig,
}

impl ActionPolicyEvaluator {
    pub fn new(config: ActionPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ActionPolicyConfig {
        &self.config
    }

    fn scaling_target(ctx: &PolicyContext) -> Option<i64> {
        match ctx.attributes.get("scalingTarget")? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl PolicyEngine for ActionPolicyEvaluator {
    fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision {
        let risk_level = ctx.str_attr("riskLevel").unwrap_or_default();
        let tool_name = ctx.str_attr("toolName");

        if risk_level.eq_ignore_ascii_case("DANGEROUS") {
            return PolicyDecision::deny(
                "Dangerous actions are blocked by policy",
                &["dangerous_block_rule"],
            );
        }

        if let Some(tool) = tool_name {
            if !self.config.tool_allowlist.contains(tool) {
                return PolicyDecision::deny(
                    format!("Tool '{tool}' is not in the allowed tool list"),
                    &["tool_allowlist_rule"],
                );
            }
        }

        // Non-numeric targets skip the rule.
        if let Some(target) = Self::scaling_target(ctx) {
            if target > self.config.max_scaling_limit {
                return PolicyDecision::deny(
                    format!(
                        "Scaling target {target} exceeds maximum limit of {}",
                        self.config.max_scaling_limit
                    ),
                    &["scaling_limit_rule"],
                );
            }
        }

        if self.config.rollback_requires_approval && tool_name.is_some_and(|t| t.contains("rollback")) {
            return PolicyDecision::escalate(
                "Rollback actions require human approval",
                &["rollback_approval_rule"],
            );
        }

        if risk_level.eq_ignore_ascii_case("READ") {
            return PolicyDecision::allow("Read-only action auto-approved", &["read_auto_approve_rule"]);
        }

        PolicyDecision::allow(
            "Safe write action approved by default policy",
            &["safe_write_approve_rule"],
        )
    }

    fn supports(&self, action: &str) -> bool {
        action == PROPOSE_ACTION
    }
}
