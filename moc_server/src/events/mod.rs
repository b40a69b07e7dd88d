//! Domain events written to the outbox.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::OutboxEvent;

/// Events that leave the control plane through the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    /// Alert accepted through the REST API.
    AlertCreated(AlertCreated),
    /// Alert ingested from a webhook and attached to an incident.
    AlertReceived(AlertReceived),
    IncidentCreated(IncidentCreated),
    ToolExecuted(ToolExecuted),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCreated {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub source: String,
    pub severity: String,
    pub status: String,
    pub policy_decision_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReceived {
    pub alert_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub source: String,
    pub severity: String,
    pub incident_id: Uuid,
    pub new_incident: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCreated {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub commander_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecuted {
    pub execution_id: Uuid,
    pub tool_name: String,
    pub status: String,
    pub duration_ms: i64,
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AlertCreated(_) => "ALERT_CREATED",
            Self::AlertReceived(_) => "ALERT_RECEIVED",
            Self::IncidentCreated(_) => "INCIDENT_CREATED",
            Self::ToolExecuted(_) => "TOOL_EXECUTED",
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            Self::AlertCreated(_) | Self::AlertReceived(_) => "Alert",
            Self::IncidentCreated(_) => "Incident",
            Self::ToolExecuted(_) => "Tool",
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self {
            Self::AlertCreated(e) => e.id,
            Self::AlertReceived(e) => e.alert_id,
            Self::IncidentCreated(e) => e.id,
            Self::ToolExecuted(e) => e.execution_id,
        }
    }

    /// Unpublished outbox row for `tenant_id`.
    pub fn into_outbox(self, tenant_id: &str) -> Result<OutboxEvent, serde_json::Error> {
        Ok(OutboxEvent {
            id: Uuid::new_v4(),
            event_type: self.event_type().to_string(),
            aggregate_type: self.aggregate_type().to_string(),
            aggregate_id: self.aggregate_id().to_string(),
            tenant_id: tenant_id.to_string(),
            payload: serde_json::to_value(&self)?,
            created_at: Utc::now(),
            published: false,
            published_at: None,
        })
    }
}
