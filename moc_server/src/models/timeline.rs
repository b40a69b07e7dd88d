//! IncidentEvent: append-only timeline entries and their factories.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{IncidentStatus, SYSTEM_PRINCIPAL};
use crate::schema::incident_events;

string_enum! {
    pub enum IncidentEventType {
        Created => "CREATED",
        StatusChanged => "STATUS_CHANGED",
        HypothesisAdded => "HYPOTHESIS_ADDED",
        EvidenceAdded => "EVIDENCE_ADDED",
        ActionProposed => "ACTION_PROPOSED",
        ActionApproved => "ACTION_APPROVED",
        ActionRejected => "ACTION_REJECTED",
        ActionExecuted => "ACTION_EXECUTED",
        ActionFailed => "ACTION_FAILED",
        AlertCorrelated => "ALERT_CORRELATED",
        ToolExecuted => "TOOL_EXECUTED",
        TriageCompleted => "TRIAGE_COMPLETED",
        GraphNodeAdded => "GRAPH_NODE_ADDED",
        GraphSeeded => "GRAPH_SEEDED",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = incident_events)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub event_type: IncidentEventType,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl IncidentEvent {
    pub fn new(
        tenant_id: &str,
        incident_id: Uuid,
        event_type: IncidentEventType,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            event_type,
            description: description.into(),
            metadata,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: SYSTEM_PRINCIPAL.to_string(),
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.created_by = author.into();
        self
    }

    pub fn created(tenant_id: &str, incident_id: Uuid, title: &str, severity: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::Created,
            format!("Incident created: {title}"),
            json!({ "severity": severity }),
        )
    }

    pub fn status_changed(
        tenant_id: &str,
        incident_id: Uuid,
        from: IncidentStatus,
        to: IncidentStatus,
    ) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::StatusChanged,
            format!("Status changed: {from} → {to}"),
            json!({ "from": from.as_str(), "to": to.as_str() }),
        )
    }

    pub fn hypothesis_added(tenant_id: &str, incident_id: Uuid, title: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::HypothesisAdded,
            format!("Hypothesis added: {title}"),
            json!({}),
        )
    }

    pub fn evidence_added(tenant_id: &str, incident_id: Uuid, title: &str, evidence_type: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::EvidenceAdded,
            format!("Evidence added: {title}"),
            json!({ "type": evidence_type }),
        )
    }

    pub fn alert_correlated(tenant_id: &str, incident_id: Uuid, alert_id: Uuid, alert_title: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::AlertCorrelated,
            format!("Alert correlated: {alert_title}"),
            json!({ "alertId": alert_id }),
        )
    }

    pub fn tool_executed(tenant_id: &str, incident_id: Uuid, tool_name: &str, status: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::ToolExecuted,
            format!("Tool executed: {tool_name} ({status})"),
            json!({ "tool": tool_name, "status": status }),
        )
    }

    pub fn triage_completed(tenant_id: &str, incident_id: Uuid, hypothesis_count: usize) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::TriageCompleted,
            format!("AI triage completed: {hypothesis_count} hypotheses generated"),
            json!({ "hypothesisCount": hypothesis_count }),
        )
    }

    pub fn graph_node_added(tenant_id: &str, incident_id: Uuid, label: &str, node_type: &str) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::GraphNodeAdded,
            format!("Graph node added: {label} ({node_type})"),
            json!({ "label": label, "nodeType": node_type }),
        )
    }

    pub fn graph_seeded(tenant_id: &str, incident_id: Uuid, node_count: usize) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            IncidentEventType::GraphSeeded,
            format!("Correlation graph seeded with {node_count} alert nodes"),
            json!({ "nodeCount": node_count }),
        )
    }

    /// Timeline entry for a guardrail step on an action.
    pub fn action(
        tenant_id: &str,
        incident_id: Uuid,
        event_type: IncidentEventType,
        action_id: Uuid,
        action_title: &str,
        detail: serde_json::Value,
    ) -> Self {
        let verb = match event_type {
            IncidentEventType::ActionApproved => "approved",
            IncidentEventType::ActionRejected => "rejected",
            IncidentEventType::ActionExecuted => "executed",
            IncidentEventType::ActionFailed => "failed",
            _ => "proposed",
        };
        let mut metadata = json!({ "actionId": action_id });
        if let (Some(target), serde_json::Value::Object(extra)) = (metadata.as_object_mut(), detail) {
            target.extend(extra);
        }
        Self::new(
            tenant_id,
            incident_id,
            event_type,
            format!("Action {verb}: {action_title}"),
            metadata,
        )
    }
}
