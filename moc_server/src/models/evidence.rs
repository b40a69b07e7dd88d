//! Evidence: an observation attached to an incident.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::evidence;

string_enum! {
    pub enum EvidenceType {
        Log => "LOG",
        Metric => "METRIC",
        Trace => "TRACE",
        Deploy => "DEPLOY",
        ToolOutput => "TOOL_OUTPUT",
        Note => "NOTE",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = evidence)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub hypothesis_id: Option<Uuid>,
    pub evidence_type: EvidenceType,
    pub title: String,
    pub content: Option<String>,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl Evidence {
    pub fn new(
        tenant_id: &str,
        incident_id: Uuid,
        evidence_type: EvidenceType,
        title: impl Into<String>,
        content: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            hypothesis_id: None,
            evidence_type,
            title: title.into(),
            content,
            source_url: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }
}
