//! Alert ingestion policy (`ingest_alert`).

use super::{PolicyContext, PolicyDecision, PolicyEngine};

pub const INGEST_ALERT: &str = "ingest_alert";

/// Dedup → critical auto-escalation → default allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertPolicyEvaluator;

impl PolicyEngine for AlertPolicyEvaluator {
    fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision {
        if ctx.bool_attr("isDuplicate") == Some(true) {
            return PolicyDecision::deny(
                "Duplicate alert with same externalId already exists",
                &["dedup_rule"],
            );
        }

        let critical = ctx
            .str_attr("severity")
            .is_some_and(|s| s.eq_ignore_ascii_case("CRITICAL"));
        if critical {
            return PolicyDecision::allow(
                "Critical alert accepted, auto-escalation recommended",
                &["severity_rule", "auto_escalate_rule"],
            );
        }

        PolicyDecision::allow("Alert accepted by default policy", &["default_allow_rule"])
    }

    fn supports(&self, action: &str) -> bool {
        action == INGEST_ALERT
    }
}
