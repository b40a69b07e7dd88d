//! Guardrailed actions: policy-gated proposal, human approval and tool-backed
//! execution with bounded retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Action, ActionDraft, ActionStatus, AuditLog, IncidentEvent, IncidentEventType, InvalidActionTransition, RiskLevel,
    ToolExecutionStatus, UnknownVariant, SYSTEM_PRINCIPAL,
};
use crate::policy::action_policy::PROPOSE_ACTION;
use crate::policy::{ActionPolicyEvaluator, PolicyContext, PolicyEngine, PolicyOutcome};
use crate::services::incident_service;
use crate::services::tool_executor::{ExecuteToolCommand, ToolExecutor};
use crate::services::tools::{parameters_from_json, ToolParameters};
use crate::store::UnitOfWork;
use crate::validation::{Validate, Violations};

pub const ENTITY_ACTION: &str = "ACTION";
const POLICY_PRINCIPAL: &str = "policy";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeActionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub parameters: ToolParameters,
    pub risk_level: Option<String>,
    pub proposed_by: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Validate for ProposeActionRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut violations = Violations::new()
            .not_blank("toolName", self.tool_name.as_deref())
            .not_blank("riskLevel", self.risk_level.as_deref());
        if let Some(raw) = self.risk_level.as_deref().filter(|s| !s.trim().is_empty()) {
            violations = violations.one_of::<RiskLevel>("riskLevel", raw);
        }
        violations.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveActionRequest {
    pub approved_by: Option<String>,
}

impl Validate for ApproveActionRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_blank("approvedBy", self.approved_by.as_deref())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectActionRequest {
    pub rejected_by: Option<String>,
    pub reason: Option<String>,
}

impl Validate for RejectActionRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_blank("rejectedBy", self.rejected_by.as_deref())
            .finish()
    }
}

/// Action as returned over HTTP, with its derived retry flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionView {
    #[serde(flatten)]
    pub action: Action,
    pub can_retry: bool,
}

impl From<Action> for ActionView {
    fn from(action: Action) -> Self {
        Self {
            can_retry: action.can_retry(),
            action,
        }
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct ActionService {
    policy: ActionPolicyEvaluator,
    executor: Arc<ToolExecutor>,
}

impl ActionService {
    pub fn new(policy: ActionPolicyEvaluator, executor: Arc<ToolExecutor>) -> Self {
        Self { policy, executor }
    }

    fn timeline(action: &Action, event_type: IncidentEventType, detail: serde_json::Value) -> IncidentEvent {
        IncidentEvent::action(
            &action.tenant_id,
            action.incident_id,
            event_type,
            action.id,
            &action.title,
            detail,
        )
    }

    /// Record a proposal. Policy denial still persists the action as
    /// `REJECTED`; a repeated idempotency key returns the stored action.
    pub async fn propose(
        &self,
        uow: &mut dyn UnitOfWork,
        incident_id: Uuid,
        request: ProposeActionRequest,
    ) -> AppResult<Action> {
        request.validate()?;
        let incident = incident_service::find(uow, incident_id).await?;

        let idempotency_key = blank_to_none(request.idempotency_key);
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = uow.find_action_by_idempotency_key(key).await? {
                tracing::info!(idempotency_key = %key, action_id = %existing.id, "Idempotent hit: action already exists");
                return Ok(existing);
            }
        }

        let tool_name = request.tool_name.unwrap_or_default();
        let raw_risk = request.risk_level.unwrap_or_default();
        let risk_level: RiskLevel = raw_risk
            .parse()
            .map_err(|e: UnknownVariant| AppError::BadRequest(e.to_string()))?;

        let mut context = PolicyContext::new(PROPOSE_ACTION, "action")
            .attribute("riskLevel", risk_level.as_str())
            .attribute("toolName", tool_name.as_str());
        if let Some(target) = request.parameters.get("scalingTarget") {
            context = context.attribute("scalingTarget", target.as_str());
        }
        let decision = self.policy.evaluate(&context);

        let mut action = Action::propose(
            &incident.tenant_id,
            incident_id,
            ActionDraft {
                title: blank_to_none(request.title).unwrap_or_else(|| format!("Run {tool_name}")),
                description: request.description,
                risk_level,
                tool_parameters: serde_json::to_value(&request.parameters)?,
                tool_name: tool_name.clone(),
                idempotency_key,
                proposed_by: blank_to_none(request.proposed_by).unwrap_or_else(|| SYSTEM_PRINCIPAL.to_string()),
            },
        );
        action.policy_decision_reason = Some(decision.reason.clone());
        action.policy_applied_rules = Some(decision.joined_rules());

        let (event, state, outcome) = match decision.outcome {
            PolicyOutcome::Deny => {
                action.reject(POLICY_PRINCIPAL, Some(decision.reason.clone()))?;
                (
                    Self::timeline(&action, IncidentEventType::ActionRejected, json!({ "rejectedBy": POLICY_PRINCIPAL, "reason": decision.reason })),
                    json!({ "status": ActionStatus::Rejected, "reason": decision.reason }),
                    "rejected",
                )
            }
            PolicyOutcome::Escalate => {
                action.requires_approval = true;
                (
                    Self::timeline(&action, IncidentEventType::ActionProposed, json!({ "toolName": tool_name, "riskLevel": risk_level })),
                    json!({ "status": ActionStatus::Proposed, "requiresApproval": true }),
                    "escalated",
                )
            }
            PolicyOutcome::Allow => {
                action.approve(POLICY_PRINCIPAL)?;
                (
                    Self::timeline(&action, IncidentEventType::ActionApproved, json!({ "approvedBy": POLICY_PRINCIPAL })),
                    json!({ "status": ActionStatus::Approved, "autoApproved": true }),
                    "auto_approved",
                )
            }
        };

        uow.insert_action(&action).await?;
        uow.insert_event(&event).await?;
        uow.insert_audit(&AuditLog::created(&action.tenant_id, incident_id, ENTITY_ACTION, action.id, state))
            .await?;
        crate::metrics::action_proposed(outcome);

        tracing::info!(
            incident_id = %incident_id,
            action_id = %action.id,
            tool = %tool_name,
            risk = %risk_level,
            outcome,
            rules = %decision.joined_rules(),
            "Action proposed"
        );
        Ok(action)
    }

    pub async fn approve(
        &self,
        uow: &mut dyn UnitOfWork,
        incident_id: Uuid,
        action_id: Uuid,
        request: ApproveActionRequest,
    ) -> AppResult<Action> {
        request.validate()?;
        let approved_by = request.approved_by.unwrap_or_default();
        let mut action = find(uow, incident_id, action_id).await?;
        let previous = action.status;

        action.approve(&approved_by)?;
        let action = uow.update_action(&action).await?;

        uow.insert_event(&Self::timeline(&action, IncidentEventType::ActionApproved, json!({ "approvedBy": approved_by })))
            .await?;
        uow.insert_audit(
            &AuditLog::status_changed(
                &action.tenant_id,
                incident_id,
                ENTITY_ACTION,
                action_id,
                json!({ "status": previous }),
                json!({ "status": ActionStatus::Approved, "approvedBy": approved_by }),
            )
            .by(&approved_by),
        )
        .await?;

        tracing::info!(incident_id = %incident_id, action_id = %action_id, approved_by = %approved_by, "Action approved");
        Ok(action)
    }

    pub async fn reject(
        &self,
        uow: &mut dyn UnitOfWork,
        incident_id: Uuid,
        action_id: Uuid,
        request: RejectActionRequest,
    ) -> AppResult<Action> {
        request.validate()?;
        let rejected_by = request.rejected_by.unwrap_or_default();
        let mut action = find(uow, incident_id, action_id).await?;
        let previous = action.status;

        action.reject(&rejected_by, request.reason.clone())?;
        let action = uow.update_action(&action).await?;

        uow.insert_event(&Self::timeline(
            &action,
            IncidentEventType::ActionRejected,
            json!({ "rejectedBy": rejected_by, "reason": request.reason }),
        ))
        .await?;
        uow.insert_audit(
            &AuditLog::status_changed(
                &action.tenant_id,
                incident_id,
                ENTITY_ACTION,
                action_id,
                json!({ "status": previous }),
                json!({ "status": ActionStatus::Rejected, "rejectedBy": rejected_by }),
            )
            .by(&rejected_by),
        )
        .await?;

        tracing::info!(
            incident_id = %incident_id,
            action_id = %action_id,
            rejected_by = %rejected_by,
            reason = request.reason.as_deref().unwrap_or(""),
            "Action rejected"
        );
        Ok(action)
    }

    /// Run the action's tool synchronously. A tool failure lands the action in
    /// `FAILED` (retryable while budget remains); storage errors propagate and
    /// roll the whole unit back.
    pub async fn execute(&self, uow: &mut dyn UnitOfWork, incident_id: Uuid, action_id: Uuid) -> AppResult<Action> {
        let mut action = find(uow, incident_id, action_id).await?;

        let is_retry = action.status == ActionStatus::Failed;
        if is_retry && !action.can_retry() {
            return Err(AppError::InvalidActionTransition(InvalidActionTransition {
                from: action.status,
                to: ActionStatus::Executing,
            }));
        }
        if is_retry {
            crate::metrics::action_retried();
            tracing::info!(action_id = %action_id, retry_count = action.retry_count, "Retrying failed action");
        }

        action.start_execution()?;
        let mut action = uow.update_action(&action).await?;

        let command = ExecuteToolCommand {
            incident_id: Some(incident_id),
            tool_name: action.tool_name.clone(),
            parameters: parameters_from_json(&action.tool_parameters),
            requested_by: action.proposed_by.clone(),
        };

        let (event_type, new_state) = match self.executor.execute(uow, command).await {
            Ok(result) if result.status == ToolExecutionStatus::Success => {
                action.complete_execution(result.execution_id)?;
                (IncidentEventType::ActionExecuted, json!({ "status": ActionStatus::Completed }))
            }
            Ok(result) => {
                let error = result
                    .error_message
                    .unwrap_or_else(|| "Tool execution failed".to_string());
                action.fail_execution(&error, Some(result.execution_id))?;
                (IncidentEventType::ActionFailed, json!({ "status": ActionStatus::Failed, "error": error }))
            }
            Err(e @ (AppError::Internal(_) | AppError::Conflict(_) | AppError::MissingTenant)) => return Err(e),
            Err(e) => {
                let error = e.to_string();
                tracing::error!(action_id = %action_id, tool = %action.tool_name, error = %error, "Action execution error");
                action.fail_execution(&error, None)?;
                (IncidentEventType::ActionFailed, json!({ "status": ActionStatus::Failed, "error": error }))
            }
        };

        let action = uow.update_action(&action).await?;
        crate::metrics::action_executed(action.status.as_str());

        let detail = match event_type {
            IncidentEventType::ActionExecuted => json!({ "toolName": action.tool_name, "toolExecutionId": action.tool_execution_id }),
            _ => json!({ "error": action.last_error, "retryCount": action.retry_count }),
        };
        uow.insert_event(&Self::timeline(&action, event_type, detail)).await?;
        uow.insert_audit(&AuditLog::status_changed(
            &action.tenant_id,
            incident_id,
            ENTITY_ACTION,
            action_id,
            json!({ "status": ActionStatus::Executing }),
            new_state,
        ))
        .await?;

        match action.status {
            ActionStatus::Completed => {
                tracing::info!(action_id = %action_id, tool = %action.tool_name, "Action executed successfully")
            }
            _ => tracing::warn!(
                action_id = %action_id,
                tool = %action.tool_name,
                error = action.last_error.as_deref().unwrap_or(""),
                "Action execution failed"
            ),
        }
        Ok(action)
    }
}

/// Newest first.
pub async fn list(uow: &mut dyn UnitOfWork, incident_id: Uuid) -> AppResult<Vec<Action>> {
    incident_service::find(uow, incident_id).await?;
    Ok(uow.list_actions(incident_id).await?)
}

/// The action, provided it belongs to `incident_id`.
pub async fn find(uow: &mut dyn UnitOfWork, incident_id: Uuid, action_id: Uuid) -> AppResult<Action> {
    uow.find_action(action_id)
        .await?
        .filter(|a| a.incident_id == incident_id)
        .ok_or(AppError::ActionNotFound(action_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::ToolConfig;
    use crate::models::{AuditAction, IncidentSeverity};
    use crate::policy::action_policy::ActionPolicyConfig;
    use crate::services::incident_service::CreateIncidentRequest;
    use crate::services::rate_limiter::Unlimited;
    use crate::services::tools::{Tool, ToolRegistry, ToolRequest, ToolResponse};
    use crate::store::{MemoryStore, Scope, Store};
    use crate::tenant::TenantId;

    /// Fails until `failures` calls have been made.
    struct Brittle {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl Tool for Brittle {
        fn name(&self) -> &str {
            "brittle"
        }

        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<ToolResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Ok(ToolResponse::failure("backend unavailable"))
            } else {
                Ok(ToolResponse::success("ok", BTreeMap::new()))
            }
        }
    }

    fn service(failures: usize) -> ActionService {
        let mut policy = ActionPolicyConfig::default();
        policy.tool_allowlist.insert("brittle".into());
        let registry = ToolRegistry::with_builtin_tools().register(Brittle {
            calls: AtomicUsize::new(0),
            failures,
        });
        let config = ToolConfig {
            timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_wait: Duration::ZERO,
            ..ToolConfig::default()
        };
        let executor = ToolExecutor::new(registry, Box::new(Unlimited), config);
        ActionService::new(ActionPolicyEvaluator::new(policy), Arc::new(executor))
    }

    async fn setup(store: &MemoryStore) -> (Box<dyn UnitOfWork>, Uuid) {
        let mut uow = store
            .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
            .await
            .unwrap();
        let incident = incident_service::create(
            uow.as_mut(),
            CreateIncidentRequest {
                external_id: Some("inc-1".into()),
                title: Some("Outage".into()),
                summary: None,
                severity: Some(IncidentSeverity::Sev1),
                commander_name: None,
                tags: BTreeMap::new(),
            },
        )
        .await
        .unwrap();
        (uow, incident.id)
    }

    fn propose_request(tool: &str, risk: &str) -> ProposeActionRequest {
        ProposeActionRequest {
            tool_name: Some(tool.into()),
            risk_level: Some(risk.into()),
            proposed_by: Some("alice".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn read_is_auto_approved() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let action = service(0)
            .propose(uow.as_mut(), incident_id, propose_request("logs", "READ"))
            .await
            .unwrap();
        assert_eq!(action.status, ActionStatus::Approved);
        assert_eq!(action.approved_by.as_deref(), Some("policy"));
        assert!(action.applied_rules().contains(&"read_auto_approve_rule"));

        let audit = uow.list_audit(action.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Created);
        assert_eq!(audit[0].new_state, Some(json!({"status": "APPROVED", "autoApproved": true})));
    }

    #[tokio::test]
    async fn denial_is_recorded_as_rejected() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let svc = service(0);

        let dangerous = svc
            .propose(uow.as_mut(), incident_id, propose_request("deploy", "DANGEROUS"))
            .await
            .unwrap();
        assert_eq!(dangerous.status, ActionStatus::Rejected);
        assert!(dangerous.applied_rules().contains(&"dangerous_block_rule"));
        assert_eq!(dangerous.rejected_by.as_deref(), Some("policy"));

        let unknown = svc
            .propose(uow.as_mut(), incident_id, propose_request("mystery", "READ"))
            .await
            .unwrap();
        assert_eq!(unknown.status, ActionStatus::Rejected);
        assert!(unknown.applied_rules().contains(&"tool_allowlist_rule"));

        let events = uow.list_events(incident_id).await.unwrap();
        let rejected = events
            .iter()
            .filter(|e| e.event_type == IncidentEventType::ActionRejected)
            .count();
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn idempotency_key_returns_the_same_action() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let svc = service(0);
        let mut request = propose_request("logs", "READ");
        request.idempotency_key = Some("idem-1".into());

        let first = svc.propose(uow.as_mut(), incident_id, request.clone()).await.unwrap();
        let events_before = uow.list_events(incident_id).await.unwrap().len();
        let second = svc.propose(uow.as_mut(), incident_id, request).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(uow.list_events(incident_id).await.unwrap().len(), events_before);
        assert_eq!(uow.list_actions(incident_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn escalation_waits_for_human_approval() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let mut policy = ActionPolicyConfig::default();
        policy.tool_allowlist.insert("deploy_rollback".into());
        let executor = ToolExecutor::from_config(ToolRegistry::with_builtin_tools(), ToolConfig::default());
        let svc = ActionService::new(ActionPolicyEvaluator::new(policy), Arc::new(executor));

        let action = svc
            .propose(uow.as_mut(), incident_id, propose_request("deploy_rollback", "SAFE_WRITE"))
            .await
            .unwrap();
        assert_eq!(action.status, ActionStatus::Proposed);
        assert!(action.requires_approval);

        let err = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ACTION_TRANSITION");

        let approved = svc
            .approve(
                uow.as_mut(),
                incident_id,
                action.id,
                ApproveActionRequest {
                    approved_by: Some("bob".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ActionStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("bob"));
        assert!(!approved.requires_approval);

        let again = svc
            .reject(
                uow.as_mut(),
                incident_id,
                action.id,
                RejectActionRequest {
                    rejected_by: Some("carol".into()),
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(again.code(), "INVALID_ACTION_TRANSITION");
    }

    #[tokio::test]
    async fn safe_write_executes_to_completion() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let svc = service(0);
        let action = svc
            .propose(uow.as_mut(), incident_id, propose_request("logs", "SAFE_WRITE"))
            .await
            .unwrap();
        assert_eq!(action.status, ActionStatus::Approved);

        let done = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
        assert_eq!(done.status, ActionStatus::Completed);
        let execution_id = done.tool_execution_id.unwrap();
        assert!(uow.find_tool_log(execution_id).await.unwrap().is_some());
        assert_eq!(uow.list_evidence(incident_id).await.unwrap().len(), 1);

        let last = uow.list_events(incident_id).await.unwrap().pop().unwrap();
        assert_eq!(last.event_type, IncidentEventType::ActionExecuted);
    }

    #[tokio::test]
    async fn failed_action_retries_until_budget_is_spent() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let svc = service(10);
        let action = svc
            .propose(uow.as_mut(), incident_id, propose_request("brittle", "SAFE_WRITE"))
            .await
            .unwrap();

        let mut current = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
        assert_eq!(current.status, ActionStatus::Failed);
        assert_eq!(current.last_error.as_deref(), Some("backend unavailable"));
        assert!(current.tool_execution_id.is_some());
        assert!(ActionView::from(current.clone()).can_retry);

        for _ in 1..current.max_retries {
            current = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
            assert_eq!(current.status, ActionStatus::Failed);
        }
        assert_eq!(current.retry_count, current.max_retries);
        assert!(!current.can_retry());

        let err = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ACTION_TRANSITION");
    }

    #[tokio::test]
    async fn retry_can_succeed() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let svc = service(1);
        let action = svc
            .propose(uow.as_mut(), incident_id, propose_request("brittle", "SAFE_WRITE"))
            .await
            .unwrap();
        let failed = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        let done = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
        assert_eq!(done.status, ActionStatus::Completed);
        assert_eq!(done.retry_count, 1);
    }

    #[tokio::test]
    async fn unregistered_tool_fails_the_action() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let mut policy = ActionPolicyConfig::default();
        policy.tool_allowlist.insert("ghost".into());
        let executor = ToolExecutor::from_config(ToolRegistry::with_builtin_tools(), ToolConfig::default());
        let svc = ActionService::new(ActionPolicyEvaluator::new(policy), Arc::new(executor));

        let action = svc
            .propose(uow.as_mut(), incident_id, propose_request("ghost", "READ"))
            .await
            .unwrap();
        let failed = svc.execute(uow.as_mut(), incident_id, action.id).await.unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("Tool not found: ghost"));
        assert_eq!(failed.tool_execution_id, None);
    }

    #[tokio::test]
    async fn action_lookup_is_scoped_to_the_incident() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let action = service(0)
            .propose(uow.as_mut(), incident_id, propose_request("logs", "READ"))
            .await
            .unwrap();
        let err = find(uow.as_mut(), Uuid::new_v4(), action.id).await.unwrap_err();
        assert_eq!(err.code(), "ACTION_NOT_FOUND");
        assert_eq!(list(uow.as_mut(), incident_id).await.unwrap().len(), 1);
    }
}
