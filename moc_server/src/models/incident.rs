//! Incident: a unit of response work advancing through a seven-state lifecycle.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::incidents;

string_enum! {
    pub enum IncidentSeverity {
        Sev1 => "SEV1",
        Sev2 => "SEV2",
        Sev3 => "SEV3",
        Sev4 => "SEV4",
    }
}

string_enum! {
    pub enum IncidentStatus {
        New => "NEW",
        Triaging => "TRIAGING",
        Investigating => "INVESTIGATING",
        Mitigating => "MITIGATING",
        Monitoring => "MONITORING",
        Resolved => "RESOLVED",
        Postmortem => "POSTMORTEM",
    }
}

/// Rejected incident status edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid incident transition: {from} → {to}")]
pub struct InvalidTransition {
    pub from: IncidentStatus,
    pub to: IncidentStatus,
}

impl IncidentStatus {
    /// Permitted targets from this status.
    pub fn allowed_targets(self) -> &'static [IncidentStatus] {
        use IncidentStatus::*;
        match self {
            New => &[Triaging],
            Triaging => &[Investigating, Resolved],
            Investigating => &[Mitigating, Resolved],
            Mitigating => &[Monitoring, Resolved],
            Monitoring => &[Resolved],
            Resolved => &[Postmortem],
            Postmortem => &[],
        }
    }

    pub fn can_transition_to(self, target: IncidentStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn validate_transition_to(self, target: IncidentStatus) -> Result<(), InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = incidents)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    pub tenant_id: String,
    pub external_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,
    pub commander_name: Option<String>,
    pub channel_id: Option<String>,
    pub tags: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl Incident {
    /// A fresh incident in `NEW`.
    pub fn new(
        tenant_id: &str,
        external_id: impl Into<String>,
        title: impl Into<String>,
        summary: Option<String>,
        severity: IncidentSeverity,
        commander_name: Option<String>,
        tags: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            external_id: external_id.into(),
            title: title.into(),
            summary,
            severity,
            status: IncidentStatus::New,
            commander_name,
            channel_id: None,
            tags,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }

    /// Move to `target`, returning the previous status. Leaves `self` untouched on error.
    pub fn transition_to(&mut self, target: IncidentStatus) -> Result<IncidentStatus, InvalidTransition> {
        self.status.validate_transition_to(target)?;
        let previous = self.status;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(previous)
    }
}
