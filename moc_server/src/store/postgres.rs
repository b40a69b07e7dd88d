//! PostgreSQL store adapter on diesel-async with a deadpool connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use uuid::Uuid;

use super::{
    check_tenant, ActionRepository, AlertRepository, AuditLogRepository, CorrelationEdgeRepository,
    CorrelationNodeRepository, EvidenceRepository, HypothesisRepository, IncidentEventRepository,
    IncidentRepository, OutboxRepository, Scope, Store, StoreError, StoreResult,
    ToolExecutionLogRepository, UnitOfWork,
};
use crate::models::{
    Action, Alert, AlertStatus, AuditLog, CorrelationEdge, CorrelationNode, Evidence, Hypothesis,
    Incident, IncidentEvent, IncidentStatus, OutboxEvent, ToolExecutionLog,
};
use crate::schema::{
    actions, alerts, audit_logs, correlation_edges, correlation_nodes, evidence, hypotheses,
    incident_events, incidents, outbox_events, tool_execution_logs,
};

pub type PgPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool for `database_url`.
    pub fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, scope: Scope) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut *conn)
            .await?;
        Ok(Box::new(PgUnitOfWork {
            conn: Some(conn),
            scope,
        }))
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

/// One pooled connection inside an open transaction.
///
/// Dropping without `commit` rolls the transaction back on a spawned task and
/// only then returns the connection to the pool. A connection whose rollback
/// fails is detached from the pool instead.
pub struct PgUnitOfWork {
    conn: Option<Object<AsyncPgConnection>>,
    scope: Scope,
}

impl Drop for PgUnitOfWork {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            drop(Object::take(conn));
            return;
        };
        runtime.spawn(async move {
            let rolled_back =
                <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::rollback_transaction(&mut *conn)
                    .await;
            if let Err(e) = rolled_back {
                tracing::warn!(error = %e, "Rollback of abandoned unit of work failed, discarding connection");
                drop(Object::take(conn));
            }
        });
    }
}

impl PgUnitOfWork {
    fn conn(&mut self) -> StoreResult<&mut AsyncPgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Pool("unit of work already finished".to_string()))
    }

    fn tenant_id(&self) -> StoreResult<String> {
        self.scope
            .tenant()
            .map(|t| t.to_string())
            .ok_or(StoreError::MissingTenant)
    }

    /// Tenant id plus connection, the pair almost every query needs.
    fn scoped(&mut self) -> StoreResult<(String, &mut AsyncPgConnection)> {
        let tenant = self.tenant_id()?;
        Ok((tenant, self.conn()?))
    }
}

fn on_insert(entity: &'static str, key: impl Into<String>) -> impl FnOnce(DieselError) -> StoreError {
    let key = key.into();
    move |e| match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Conflict { entity, key }
        }
        other => StoreError::Database(other),
    }
}

fn stale_if_zero(rows: usize, entity: &'static str, id: Uuid) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::StaleVersion { entity, id })
    } else {
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for PgUnitOfWork {
    async fn insert_alert(&mut self, alert: &Alert) -> StoreResult<()> {
        check_tenant(&self.scope, &alert.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(alerts::table)
            .values(alert)
            .execute(conn)
            .await
            .map_err(on_insert("Alert", &alert.external_id))?;
        Ok(())
    }

    async fn update_alert(&mut self, alert: &Alert) -> StoreResult<Alert> {
        check_tenant(&self.scope, &alert.tenant_id)?;
        let (tenant, conn) = self.scoped()?;
        let mut next = alert.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        let rows = diesel::update(
            alerts::table
                .filter(alerts::id.eq(alert.id))
                .filter(alerts::tenant_id.eq(&tenant))
                .filter(alerts::version.eq(alert.version)),
        )
        .set(&next)
        .execute(conn)
        .await?;
        stale_if_zero(rows, "Alert", alert.id)?;
        Ok(next)
    }

    async fn find_alert(&mut self, id: Uuid) -> StoreResult<Option<Alert>> {
        let (tenant, conn) = self.scoped()?;
        Ok(alerts::table
            .filter(alerts::id.eq(id))
            .filter(alerts::tenant_id.eq(tenant))
            .select(Alert::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn find_alert_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Alert>> {
        let (tenant, conn) = self.scoped()?;
        Ok(alerts::table
            .filter(alerts::external_id.eq(external_id))
            .filter(alerts::tenant_id.eq(tenant))
            .select(Alert::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_alerts_by_status(&mut self, status: AlertStatus) -> StoreResult<Vec<Alert>> {
        let (tenant, conn) = self.scoped()?;
        Ok(alerts::table
            .filter(alerts::status.eq(status))
            .filter(alerts::tenant_id.eq(tenant))
            .order(alerts::created_at.desc())
            .select(Alert::as_select())
            .load(conn)
            .await?)
    }

    async fn list_alerts_by_incident(&mut self, incident_id: Uuid) -> StoreResult<Vec<Alert>> {
        let (tenant, conn) = self.scoped()?;
        Ok(alerts::table
            .filter(alerts::incident_id.eq(incident_id))
            .filter(alerts::tenant_id.eq(tenant))
            .order(alerts::created_at.asc())
            .select(Alert::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl IncidentRepository for PgUnitOfWork {
    async fn insert_incident(&mut self, incident: &Incident) -> StoreResult<()> {
        check_tenant(&self.scope, &incident.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(incidents::table)
            .values(incident)
            .execute(conn)
            .await
            .map_err(on_insert("Incident", &incident.external_id))?;
        Ok(())
    }

    async fn update_incident(&mut self, incident: &Incident) -> StoreResult<Incident> {
        check_tenant(&self.scope, &incident.tenant_id)?;
        let (tenant, conn) = self.scoped()?;
        let mut next = incident.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        let rows = diesel::update(
            incidents::table
                .filter(incidents::id.eq(incident.id))
                .filter(incidents::tenant_id.eq(&tenant))
                .filter(incidents::version.eq(incident.version)),
        )
        .set(&next)
        .execute(conn)
        .await?;
        stale_if_zero(rows, "Incident", incident.id)?;
        Ok(next)
    }

    async fn find_incident(&mut self, id: Uuid) -> StoreResult<Option<Incident>> {
        let (tenant, conn) = self.scoped()?;
        Ok(incidents::table
            .filter(incidents::id.eq(id))
            .filter(incidents::tenant_id.eq(tenant))
            .select(Incident::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn find_incident_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Incident>> {
        let (tenant, conn) = self.scoped()?;
        Ok(incidents::table
            .filter(incidents::external_id.eq(external_id))
            .filter(incidents::tenant_id.eq(tenant))
            .select(Incident::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_incidents(&mut self, status: Option<IncidentStatus>) -> StoreResult<Vec<Incident>> {
        let (tenant, conn) = self.scoped()?;
        let mut query = incidents::table
            .filter(incidents::tenant_id.eq(tenant))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(incidents::status.eq(status));
        }
        Ok(query
            .order(incidents::created_at.desc())
            .select(Incident::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl IncidentEventRepository for PgUnitOfWork {
    async fn insert_event(&mut self, event: &IncidentEvent) -> StoreResult<()> {
        check_tenant(&self.scope, &event.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(incident_events::table)
            .values(event)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_events(&mut self, incident_id: Uuid) -> StoreResult<Vec<IncidentEvent>> {
        let (tenant, conn) = self.scoped()?;
        Ok(incident_events::table
            .filter(incident_events::incident_id.eq(incident_id))
            .filter(incident_events::tenant_id.eq(tenant))
            .order(incident_events::created_at.asc())
            .select(IncidentEvent::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl HypothesisRepository for PgUnitOfWork {
    async fn insert_hypothesis(&mut self, hypothesis: &Hypothesis) -> StoreResult<()> {
        check_tenant(&self.scope, &hypothesis.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(hypotheses::table)
            .values(hypothesis)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_hypotheses(&mut self, incident_id: Uuid) -> StoreResult<Vec<Hypothesis>> {
        let (tenant, conn) = self.scoped()?;
        Ok(hypotheses::table
            .filter(hypotheses::incident_id.eq(incident_id))
            .filter(hypotheses::tenant_id.eq(tenant))
            .order(hypotheses::created_at.desc())
            .select(Hypothesis::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl EvidenceRepository for PgUnitOfWork {
    async fn insert_evidence(&mut self, row: &Evidence) -> StoreResult<()> {
        check_tenant(&self.scope, &row.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(evidence::table)
            .values(row)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_evidence(&mut self, incident_id: Uuid) -> StoreResult<Vec<Evidence>> {
        let (tenant, conn) = self.scoped()?;
        Ok(evidence::table
            .filter(evidence::incident_id.eq(incident_id))
            .filter(evidence::tenant_id.eq(tenant))
            .order(evidence::created_at.desc())
            .select(Evidence::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl ActionRepository for PgUnitOfWork {
    async fn insert_action(&mut self, action: &Action) -> StoreResult<()> {
        check_tenant(&self.scope, &action.tenant_id)?;
        let key = action
            .idempotency_key
            .clone()
            .unwrap_or_else(|| action.id.to_string());
        let conn = self.conn()?;
        diesel::insert_into(actions::table)
            .values(action)
            .execute(conn)
            .await
            .map_err(on_insert("Action", key))?;
        Ok(())
    }

    async fn update_action(&mut self, action: &Action) -> StoreResult<Action> {
        check_tenant(&self.scope, &action.tenant_id)?;
        let (tenant, conn) = self.scoped()?;
        let mut next = action.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        let rows = diesel::update(
            actions::table
                .filter(actions::id.eq(action.id))
                .filter(actions::tenant_id.eq(&tenant))
                .filter(actions::version.eq(action.version)),
        )
        .set(&next)
        .execute(conn)
        .await?;
        stale_if_zero(rows, "Action", action.id)?;
        Ok(next)
    }

    async fn find_action(&mut self, id: Uuid) -> StoreResult<Option<Action>> {
        let (tenant, conn) = self.scoped()?;
        Ok(actions::table
            .filter(actions::id.eq(id))
            .filter(actions::tenant_id.eq(tenant))
            .select(Action::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn find_action_by_idempotency_key(&mut self, key: &str) -> StoreResult<Option<Action>> {
        let (tenant, conn) = self.scoped()?;
        Ok(actions::table
            .filter(actions::idempotency_key.eq(key))
            .filter(actions::tenant_id.eq(tenant))
            .select(Action::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_actions(&mut self, incident_id: Uuid) -> StoreResult<Vec<Action>> {
        let (tenant, conn) = self.scoped()?;
        Ok(actions::table
            .filter(actions::incident_id.eq(incident_id))
            .filter(actions::tenant_id.eq(tenant))
            .order(actions::created_at.desc())
            .select(Action::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl ToolExecutionLogRepository for PgUnitOfWork {
    async fn insert_tool_log(&mut self, log: &ToolExecutionLog) -> StoreResult<()> {
        check_tenant(&self.scope, &log.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(tool_execution_logs::table)
            .values(log)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn find_tool_log(&mut self, id: Uuid) -> StoreResult<Option<ToolExecutionLog>> {
        let (tenant, conn) = self.scoped()?;
        Ok(tool_execution_logs::table
            .filter(tool_execution_logs::id.eq(id))
            .filter(tool_execution_logs::tenant_id.eq(tenant))
            .select(ToolExecutionLog::as_select())
            .first(conn)
            .await
            .optional()?)
    }
}

#[async_trait]
impl AuditLogRepository for PgUnitOfWork {
    async fn insert_audit(&mut self, entry: &AuditLog) -> StoreResult<()> {
        check_tenant(&self.scope, &entry.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(audit_logs::table)
            .values(entry)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_audit(&mut self, entity_id: Uuid) -> StoreResult<Vec<AuditLog>> {
        let (tenant, conn) = self.scoped()?;
        Ok(audit_logs::table
            .filter(audit_logs::entity_id.eq(entity_id))
            .filter(audit_logs::tenant_id.eq(tenant))
            .order(audit_logs::created_at.asc())
            .select(AuditLog::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl CorrelationNodeRepository for PgUnitOfWork {
    async fn insert_node(&mut self, node: &CorrelationNode) -> StoreResult<()> {
        check_tenant(&self.scope, &node.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(correlation_nodes::table)
            .values(node)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn find_node(&mut self, id: Uuid) -> StoreResult<Option<CorrelationNode>> {
        let (tenant, conn) = self.scoped()?;
        Ok(correlation_nodes::table
            .filter(correlation_nodes::id.eq(id))
            .filter(correlation_nodes::tenant_id.eq(tenant))
            .select(CorrelationNode::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_nodes(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationNode>> {
        let (tenant, conn) = self.scoped()?;
        Ok(correlation_nodes::table
            .filter(correlation_nodes::incident_id.eq(incident_id))
            .filter(correlation_nodes::tenant_id.eq(tenant))
            .order(correlation_nodes::created_at.asc())
            .select(CorrelationNode::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl CorrelationEdgeRepository for PgUnitOfWork {
    async fn insert_edge(&mut self, edge: &CorrelationEdge) -> StoreResult<()> {
        check_tenant(&self.scope, &edge.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(correlation_edges::table)
            .values(edge)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_edges(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationEdge>> {
        let (tenant, conn) = self.scoped()?;
        Ok(correlation_edges::table
            .filter(correlation_edges::incident_id.eq(incident_id))
            .filter(correlation_edges::tenant_id.eq(tenant))
            .order(correlation_edges::created_at.asc())
            .select(CorrelationEdge::as_select())
            .load(conn)
            .await?)
    }
}

#[async_trait]
impl OutboxRepository for PgUnitOfWork {
    async fn insert_outbox(&mut self, event: &OutboxEvent) -> StoreResult<()> {
        check_tenant(&self.scope, &event.tenant_id)?;
        let conn = self.conn()?;
        diesel::insert_into(outbox_events::table)
            .values(event)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn list_unpublished(&mut self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        let tenant = self.scope.tenant().map(|t| t.to_string());
        let conn = self.conn()?;
        let mut query = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .into_boxed();
        if let Some(tenant) = tenant {
            query = query.filter(outbox_events::tenant_id.eq(tenant));
        }
        Ok(query
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(OutboxEvent::as_select())
            .load(conn)
            .await?)
    }

    async fn mark_published(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let tenant = self.scope.tenant().map(|t| t.to_string());
        let conn = self.conn()?;
        let mut query = diesel::update(outbox_events::table)
            .filter(outbox_events::id.eq(id))
            .filter(outbox_events::published.eq(false))
            .into_boxed();
        if let Some(tenant) = tenant {
            query = query.filter(outbox_events::tenant_id.eq(tenant));
        }
        query
            .set((
                outbox_events::published.eq(true),
                outbox_events::published_at.eq(Some(at)),
            ))
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn scope(&self) -> &Scope {
        &self.scope
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let conn = self.conn()?;
        <AnsiTransactionManager as TransactionManager<AsyncPgConnection>>::commit_transaction(conn).await?;
        self.conn = None;
        Ok(())
    }
}
