//! Alert: a signal from a monitoring source; `external_id` is the dedup key.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::alerts;

string_enum! {
    pub enum AlertSeverity {
        Critical => "CRITICAL",
        High => "HIGH",
        Warning => "WARNING",
        Info => "INFO",
    }
}

string_enum! {
    pub enum AlertStatus {
        Open => "OPEN",
        Acknowledged => "ACKNOWLEDGED",
        Resolved => "RESOLVED",
        Suppressed => "SUPPRESSED",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = alerts)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: String,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub source: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub labels: serde_json::Value,
    pub policy_decision_reason: Option<String>,
    pub incident_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl Alert {
    pub fn new(
        tenant_id: &str,
        external_id: impl Into<String>,
        title: impl Into<String>,
        description: Option<String>,
        source: impl Into<String>,
        severity: AlertSeverity,
        labels: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            external_id: external_id.into(),
            title: title.into(),
            description,
            source: source.into(),
            severity,
            status: AlertStatus::Open,
            labels,
            policy_decision_reason: None,
            incident_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }

    pub fn acknowledge(&mut self) {
        self.status = AlertStatus::Acknowledged;
        self.updated_at = Utc::now();
    }

    pub fn resolve(&mut self) {
        self.status = AlertStatus::Resolved;
        self.updated_at = Utc::now();
    }

    pub fn suppress(&mut self) {
        self.status = AlertStatus::Suppressed;
        self.updated_at = Utc::now();
    }

    pub fn link_to_incident(&mut self, incident_id: Uuid) {
        self.incident_id = Some(incident_id);
    }
}
