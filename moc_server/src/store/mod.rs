//! Persistence ports.
//!
//! One repository trait per entity; a [`UnitOfWork`] bundles them inside a single
//! transaction. Dropping a unit of work without calling `commit` rolls it back.
//! Every read is filtered by the unit's tenant scope; every insert is checked
//! against it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Action, Alert, AlertStatus, AuditLog, CorrelationEdge, CorrelationNode, Evidence, Hypothesis,
    Incident, IncidentEvent, IncidentStatus, OutboxEvent, ToolExecutionLog,
};
use crate::tenant::TenantId;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Convenience re-exports for service code.
pub mod prelude {
    pub use super::{
        ActionRepository, AlertRepository, AuditLogRepository, CorrelationEdgeRepository,
        CorrelationNodeRepository, EvidenceRepository, HypothesisRepository, IncidentEventRepository,
        IncidentRepository, OutboxRepository, Scope, Store, StoreError, StoreResult,
        ToolExecutionLogRepository, UnitOfWork,
    };
}

/// Whose rows a unit of work may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Tenant(TenantId),
    /// Cross-tenant access, reserved for the outbox relay.
    System,
}

impl Scope {
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            Scope::Tenant(t) => Some(t),
            Scope::System => None,
        }
    }

    /// Whether a row stamped `tenant_id` is visible in this scope.
    pub fn admits(&self, tenant_id: &str) -> bool {
        match self {
            Scope::Tenant(t) => t.as_str() == tenant_id,
            Scope::System => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("X-Customer-Id header is required")]
    MissingTenant,

    #[error("Row belongs to tenant {row} but the unit of work is scoped to {scope}")]
    TenantMismatch { row: String, scope: String },

    #[error("{entity} with key {key} already exists")]
    Conflict { entity: &'static str, key: String },

    #[error("{entity} {id} was modified concurrently")]
    StaleVersion { entity: &'static str, id: Uuid },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reject rows whose tenant differs from the unit's scope.
pub fn check_tenant(scope: &Scope, tenant_id: &str) -> StoreResult<()> {
    match scope {
        Scope::Tenant(t) if t.as_str() != tenant_id => Err(StoreError::TenantMismatch {
            row: tenant_id.to_string(),
            scope: t.to_string(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
pub trait AlertRepository: Send {
    async fn insert_alert(&mut self, alert: &Alert) -> StoreResult<()>;
    /// Persist `alert` if its version still matches; returns the stored row.
    async fn update_alert(&mut self, alert: &Alert) -> StoreResult<Alert>;
    async fn find_alert(&mut self, id: Uuid) -> StoreResult<Option<Alert>>;
    async fn find_alert_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Alert>>;
    /// Newest first.
    async fn list_alerts_by_status(&mut self, status: AlertStatus) -> StoreResult<Vec<Alert>>;
    async fn list_alerts_by_incident(&mut self, incident_id: Uuid) -> StoreResult<Vec<Alert>>;
}

#[async_trait]
pub trait IncidentRepository: Send {
    async fn insert_incident(&mut self, incident: &Incident) -> StoreResult<()>;
    async fn update_incident(&mut self, incident: &Incident) -> StoreResult<Incident>;
    async fn find_incident(&mut self, id: Uuid) -> StoreResult<Option<Incident>>;
    async fn find_incident_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Incident>>;
    /// Newest first; `None` lists every status.
    async fn list_incidents(&mut self, status: Option<IncidentStatus>) -> StoreResult<Vec<Incident>>;
}

#[async_trait]
pub trait IncidentEventRepository: Send {
    async fn insert_event(&mut self, event: &IncidentEvent) -> StoreResult<()>;
    /// Oldest first.
    async fn list_events(&mut self, incident_id: Uuid) -> StoreResult<Vec<IncidentEvent>>;
}

#[async_trait]
pub trait HypothesisRepository: Send {
    async fn insert_hypothesis(&mut self, hypothesis: &Hypothesis) -> StoreResult<()>;
    /// Newest first.
    async fn list_hypotheses(&mut self, incident_id: Uuid) -> StoreResult<Vec<Hypothesis>>;
}

#[async_trait]
pub trait EvidenceRepository: Send {
    async fn insert_evidence(&mut self, evidence: &Evidence) -> StoreResult<()>;
    /// Newest first.
    async fn list_evidence(&mut self, incident_id: Uuid) -> StoreResult<Vec<Evidence>>;
}

#[async_trait]
pub trait ActionRepository: Send {
    async fn insert_action(&mut self, action: &Action) -> StoreResult<()>;
    async fn update_action(&mut self, action: &Action) -> StoreResult<Action>;
    async fn find_action(&mut self, id: Uuid) -> StoreResult<Option<Action>>;
    async fn find_action_by_idempotency_key(&mut self, key: &str) -> StoreResult<Option<Action>>;
    /// Newest first.
    async fn list_actions(&mut self, incident_id: Uuid) -> StoreResult<Vec<Action>>;
}

#[async_trait]
pub trait ToolExecutionLogRepository: Send {
    async fn insert_tool_log(&mut self, log: &ToolExecutionLog) -> StoreResult<()>;
    async fn find_tool_log(&mut self, id: Uuid) -> StoreResult<Option<ToolExecutionLog>>;
}

#[async_trait]
pub trait AuditLogRepository: Send {
    async fn insert_audit(&mut self, entry: &AuditLog) -> StoreResult<()>;
    /// Oldest first.
    async fn list_audit(&mut self, entity_id: Uuid) -> StoreResult<Vec<AuditLog>>;
}

#[async_trait]
pub trait CorrelationNodeRepository: Send {
    async fn insert_node(&mut self, node: &CorrelationNode) -> StoreResult<()>;
    async fn find_node(&mut self, id: Uuid) -> StoreResult<Option<CorrelationNode>>;
    /// Oldest first.
    async fn list_nodes(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationNode>>;
}

#[async_trait]
pub trait CorrelationEdgeRepository: Send {
    async fn insert_edge(&mut self, edge: &CorrelationEdge) -> StoreResult<()>;
    /// Oldest first.
    async fn list_edges(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationEdge>>;
}

#[async_trait]
pub trait OutboxRepository: Send {
    async fn insert_outbox(&mut self, event: &OutboxEvent) -> StoreResult<()>;
    /// Up to `limit` unpublished events, oldest first.
    async fn list_unpublished(&mut self, limit: i64) -> StoreResult<Vec<OutboxEvent>>;
    /// Set `published`; a no-op for rows already published.
    async fn mark_published(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

/// All repositories over one transaction.
#[async_trait]
pub trait UnitOfWork:
    AlertRepository
    + IncidentRepository
    + IncidentEventRepository
    + HypothesisRepository
    + EvidenceRepository
    + ActionRepository
    + ToolExecutionLogRepository
    + AuditLogRepository
    + CorrelationNodeRepository
    + CorrelationEdgeRepository
    + OutboxRepository
    + Send
{
    fn scope(&self) -> &Scope;

    /// Tenant of this unit; `MissingTenant` under the system scope.
    fn tenant(&self) -> StoreResult<&TenantId> {
        self.scope().tenant().ok_or(StoreError::MissingTenant)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Opens units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, scope: Scope) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Short name for logs and the health endpoint.
    fn kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_scope_admits_every_tenant() {
        assert!(Scope::System.admits("anyone"));
        let acme = Scope::Tenant(TenantId::parse("acme").unwrap());
        assert!(acme.admits("acme"));
        assert!(!acme.admits("globex"));
    }

    #[test]
    fn tenant_check_rejects_foreign_rows() {
        let acme = Scope::Tenant(TenantId::parse("acme").unwrap());
        assert!(check_tenant(&acme, "acme").is_ok());
        assert!(matches!(
            check_tenant(&acme, "globex"),
            Err(StoreError::TenantMismatch { .. })
        ));
        assert!(check_tenant(&Scope::System, "globex").is_ok());
    }
}
