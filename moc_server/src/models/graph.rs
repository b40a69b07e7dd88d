//! Correlation graph rows: typed nodes and directed weighted edges per incident.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{correlation_edges, correlation_nodes};

string_enum! {
    pub enum NodeType {
        Alert => "ALERT",
        MetricAnomaly => "METRIC_ANOMALY",
        LogCluster => "LOG_CLUSTER",
        Deploy => "DEPLOY",
        Service => "SERVICE",
        Dependency => "DEPENDENCY",
    }
}

impl NodeType {
    /// Node types a root-cause search starts from.
    pub fn is_symptom(self) -> bool {
        matches!(self, NodeType::Alert | NodeType::MetricAnomaly | NodeType::LogCluster)
    }

    /// Node types a root-cause path may end on.
    pub fn is_root_cause(self) -> bool {
        matches!(self, NodeType::Deploy | NodeType::Service)
    }
}

string_enum! {
    pub enum EdgeType {
        TimeCorrelation => "TIME_CORRELATION",
        DependsOn => "DEPENDS_ON",
        CausalHint => "CAUSAL_HINT",
        SameRelease => "SAME_RELEASE",
    }
}

impl EdgeType {
    /// Edge types followed by root-cause and blast-radius traversal.
    pub fn is_traversable(self) -> bool {
        matches!(self, EdgeType::CausalHint | EdgeType::DependsOn)
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = correlation_nodes)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationNode {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub node_type: NodeType,
    pub label: String,
    pub description: Option<String>,
    pub reference_id: Option<Uuid>,
    pub source: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl CorrelationNode {
    pub fn new(
        tenant_id: &str,
        incident_id: Uuid,
        node_type: NodeType,
        label: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            node_type,
            label: label.into(),
            description: None,
            reference_id: None,
            source: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = correlation_edges)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEdge {
    pub id: Uuid,
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}

impl CorrelationEdge {
    pub fn new(
        tenant_id: &str,
        incident_id: Uuid,
        source_node_id: Uuid,
        target_node_id: Uuid,
        edge_type: EdgeType,
        weight: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            incident_id,
            source_node_id,
            target_node_id,
            edge_type,
            weight,
            reason: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: super::SYSTEM_PRINCIPAL.to_string(),
        }
    }
}
