//! Action: a proposed production change executed through the guardrail lifecycle.
//!
//! PROPOSED → APPROVED | REJECTED, APPROVED → EXECUTING, EXECUTING → COMPLETED | FAILED,
//! FAILED → EXECUTING while retries remain. PENDING, IN_PROGRESS and SKIPPED are legacy
//! values kept readable for old rows; they have no outgoing edges.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::actions;

/// Retries granted to a freshly proposed action.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

string_enum! {
    pub enum ActionStatus {
        Proposed => "PROPOSED",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Executing => "EXECUTING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Skipped => "SKIPPED",
    }
}

string_enum! {
    pub enum ActionType {
        Manual => "MANUAL",
        Automated => "AUTOMATED",
        AiSuggested => "AI_SUGGESTED",
        Guardrailed => "GUARDRAILED",
    }
}

string_enum! {
    pub enum RiskLevel {
        Read => "READ",
        SafeWrite => "SAFE_WRITE",
        Dangerous => "DANGEROUS",
    }
}

/// Rejected action status edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid action transition: {from} → {to}")]
pub struct InvalidActionTransition {
    pub from: ActionStatus,
    pub to: ActionStatus,
}

impl ActionStatus {
    pub fn allowed_targets(self) -> &'static [ActionStatus] {
        use ActionStatus::*;
        match self {
            Proposed => &[Approved, Rejected],
            Approved => &[Executing],
            Executing => &[Completed, Failed],
            Failed => &[Executing],
            Rejected | Completed | Pending | InProgress | Skipped => &[],
        }
    }

    pub fn can_transition_to(self, target: ActionStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn validate_transition_to(self, target: ActionStatus) -> Result<(), InvalidActionTransition> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(InvalidActionTransition {
                from: self,
                to: target,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = actions)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: ActionStatus,
    pub action_type: ActionType,
    pub risk_level: RiskLevel,
    pub tool_name: String,
    pub tool_parameters: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub requires_approval: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub policy_decision_reason: Option<String>,
    pub policy_applied_rules: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub tool_execution_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub proposed_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

/// Fields supplied by whoever proposes an action.
#[derive(Debug, Clone)]
pub struct ActionDraft {
    pub title: String,
    pub description: Option<String>,
    pub risk_level: RiskLevel,
    pub tool_name: String,
    pub tool_parameters: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub proposed_by: String,
}

impl Action {
    /// New guardrailed action in `PROPOSED`.
    pub fn propose(tenant_id: &str, incident_id: Uuid, draft: ActionDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            title: draft.title,
            description: draft.description,
            status: ActionStatus::Proposed,
            action_type: ActionType::Guardrailed,
            risk_level: draft.risk_level,
            tool_name: draft.tool_name,
            tool_parameters: draft.tool_parameters,
            idempotency_key: draft.idempotency_key,
            requires_approval: false,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            policy_decision_reason: None,
            policy_applied_rules: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            tool_execution_id: None,
            last_error: None,
            created_by: draft.proposed_by.clone(),
            proposed_by: draft.proposed_by,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == ActionStatus::Failed && self.retry_count < self.max_retries
    }

    fn move_to(&mut self, target: ActionStatus) -> Result<(), InvalidActionTransition> {
        self.status.validate_transition_to(target)?;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn approve(&mut self, by: &str) -> Result<(), InvalidActionTransition> {
        self.move_to(ActionStatus::Approved)?;
        self.approved_by = Some(by.to_string());
        self.approved_at = Some(self.updated_at);
        self.requires_approval = false;
        Ok(())
    }

    pub fn reject(&mut self, by: &str, reason: Option<String>) -> Result<(), InvalidActionTransition> {
        self.move_to(ActionStatus::Rejected)?;
        self.rejected_by = Some(by.to_string());
        self.rejected_at = Some(self.updated_at);
        self.rejection_reason = reason;
        Ok(())
    }

    /// Enter `EXECUTING`; from `FAILED` only while retries remain.
    pub fn start_execution(&mut self) -> Result<(), InvalidActionTransition> {
        if self.status == ActionStatus::Failed && !self.can_retry() {
            return Err(InvalidActionTransition {
                from: self.status,
                to: ActionStatus::Executing,
            });
        }
        self.move_to(ActionStatus::Executing)
    }

    pub fn complete_execution(&mut self, execution_id: Uuid) -> Result<(), InvalidActionTransition> {
        self.move_to(ActionStatus::Completed)?;
        self.tool_execution_id = Some(execution_id);
        Ok(())
    }

    pub fn fail_execution(
        &mut self,
        error: impl Into<String>,
        execution_id: Option<Uuid>,
    ) -> Result<(), InvalidActionTransition> {
        self.move_to(ActionStatus::Failed)?;
        self.last_error = Some(error.into());
        self.tool_execution_id = execution_id;
        self.retry_count += 1;
        Ok(())
    }

    pub fn applied_rules(&self) -> Vec<&str> {
        self.policy_applied_rules
            .as_deref()
            .map(|rules| rules.split(',').filter(|r| !r.is_empty()).collect())
            .unwrap_or_default()
    }
}
