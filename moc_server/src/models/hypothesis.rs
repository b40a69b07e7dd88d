//! Hypothesis: a candidate root-cause narrative.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::hypotheses;

string_enum! {
    pub enum HypothesisStatus {
        Proposed => "PROPOSED",
        Investigating => "INVESTIGATING",
        Confirmed => "CONFIRMED",
        Rejected => "REJECTED",
    }
}

string_enum! {
    pub enum HypothesisSource {
        Human => "HUMAN",
        Ai => "AI",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = hypotheses)]
#[serde(rename_all = "camelCase")]
pub struct Hypothesis {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: HypothesisStatus,
    pub confidence: f64,
    pub source: HypothesisSource,
    pub evidence_for: Option<String>,
    pub evidence_against: Option<String>,
    pub next_best_test: Option<String>,
    pub stop_condition: Option<String>,
    pub evidence_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl Hypothesis {
    /// New `PROPOSED` hypothesis; confidence is clamped into `[0, 1]`.
    pub fn new(
        tenant_id: &str,
        incident_id: Uuid,
        title: impl Into<String>,
        description: Option<String>,
        confidence: f64,
        source: HypothesisSource,
    ) -> Self {
        let now = Utc::now();
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            title: title.into(),
            description,
            status: HypothesisStatus::Proposed,
            confidence,
            source,
            evidence_for: None,
            evidence_against: None,
            next_best_test: None,
            stop_condition: None,
            evidence_hash: None,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }
}
