//! AuditLog: append-only record of entity creation and status changes.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::audit_logs;

string_enum! {
    pub enum AuditAction {
        Created => "CREATED",
        Updated => "UPDATED",
        StatusChanged => "STATUS_CHANGED",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = audit_logs)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl AuditLog {
    fn new(
        tenant_id: &str,
        incident_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        action: AuditAction,
        previous_state: Option<serde_json::Value>,
        new_state: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            entity_type: entity_type.to_string(),
            entity_id,
            action,
            previous_state,
            new_state,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }

    pub fn created(
        tenant_id: &str,
        incident_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        state: serde_json::Value,
    ) -> Self {
        Self::new(tenant_id, incident_id, entity_type, entity_id, AuditAction::Created, None, Some(state))
    }

    pub fn status_changed(
        tenant_id: &str,
        incident_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        previous_state: serde_json::Value,
        new_state: serde_json::Value,
    ) -> Self {
        Self::new(
            tenant_id,
            incident_id,
            entity_type,
            entity_id,
            AuditAction::StatusChanged,
            Some(previous_state),
            Some(new_state),
        )
    }

    pub fn by(mut self, principal: impl Into<String>) -> Self {
        self.created_by = principal.into();
        self
    }
}
