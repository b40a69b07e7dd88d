//! In-process store adapter.
//!
//! Rows are partitioned by tenant, one mutex per partition. A unit of work holds
//! its tenant's lock for its whole life and mutates a private copy that replaces
//! the partition on commit, so units of work for one tenant are serializable,
//! units for different tenants never wait on each other, and a dropped unit
//! leaves nothing behind. The system scope locks every partition in tenant order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
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

/// Id and tenant accessors shared by every stored row.
trait Row: Clone {
    fn row_id(&self) -> Uuid;
    fn row_tenant(&self) -> &str;
}

macro_rules! impl_row {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Row for $ty {
                fn row_id(&self) -> Uuid {
                    self.id
                }

                fn row_tenant(&self) -> &str {
                    &self.tenant_id
                }
            }
        )+
    };
}

/// Rows updated in place under optimistic concurrency.
trait Versioned: Row {
    fn version(&self) -> i64;
    fn bump(&mut self, now: DateTime<Utc>);
}

macro_rules! impl_versioned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Versioned for $ty {
                fn version(&self) -> i64 {
                    self.version
                }

                fn bump(&mut self, now: DateTime<Utc>) {
                    self.version += 1;
                    self.updated_at = now;
                }
            }
        )+
    };
}

impl_versioned!(Alert, Incident, Action);

impl_row!(
    Alert,
    Incident,
    IncidentEvent,
    Hypothesis,
    Evidence,
    Action,
    ToolExecutionLog,
    AuditLog,
    CorrelationNode,
    CorrelationEdge,
    OutboxEvent,
);

#[derive(Debug, Clone, Default)]
struct Tables {
    alerts: Vec<Alert>,
    incidents: Vec<Incident>,
    events: Vec<IncidentEvent>,
    hypotheses: Vec<Hypothesis>,
    evidence: Vec<Evidence>,
    actions: Vec<Action>,
    tool_logs: Vec<ToolExecutionLog>,
    audit: Vec<AuditLog>,
    nodes: Vec<CorrelationNode>,
    edges: Vec<CorrelationEdge>,
    outbox: Vec<OutboxEvent>,
}

fn drain_tenant<T: Row>(rows: &mut Vec<T>, tenant: &str) -> Vec<T> {
    let (taken, kept) = std::mem::take(rows)
        .into_iter()
        .partition(|r| r.row_tenant() == tenant);
    *rows = kept;
    taken
}

fn collect_tenants<T: Row>(rows: &[T], into: &mut BTreeSet<String>) {
    into.extend(rows.iter().map(|r| r.row_tenant().to_string()));
}

impl Tables {
    fn append(&mut self, mut other: Tables) {
        self.alerts.append(&mut other.alerts);
        self.incidents.append(&mut other.incidents);
        self.events.append(&mut other.events);
        self.hypotheses.append(&mut other.hypotheses);
        self.evidence.append(&mut other.evidence);
        self.actions.append(&mut other.actions);
        self.tool_logs.append(&mut other.tool_logs);
        self.audit.append(&mut other.audit);
        self.nodes.append(&mut other.nodes);
        self.edges.append(&mut other.edges);
        self.outbox.append(&mut other.outbox);
    }

    /// Move out every row stamped `tenant`.
    fn take_tenant(&mut self, tenant: &str) -> Tables {
        Tables {
            alerts: drain_tenant(&mut self.alerts, tenant),
            incidents: drain_tenant(&mut self.incidents, tenant),
            events: drain_tenant(&mut self.events, tenant),
            hypotheses: drain_tenant(&mut self.hypotheses, tenant),
            evidence: drain_tenant(&mut self.evidence, tenant),
            actions: drain_tenant(&mut self.actions, tenant),
            tool_logs: drain_tenant(&mut self.tool_logs, tenant),
            audit: drain_tenant(&mut self.audit, tenant),
            nodes: drain_tenant(&mut self.nodes, tenant),
            edges: drain_tenant(&mut self.edges, tenant),
            outbox: drain_tenant(&mut self.outbox, tenant),
        }
    }

    fn tenants(&self) -> BTreeSet<String> {
        let mut tenants = BTreeSet::new();
        collect_tenants(&self.alerts, &mut tenants);
        collect_tenants(&self.incidents, &mut tenants);
        collect_tenants(&self.events, &mut tenants);
        collect_tenants(&self.hypotheses, &mut tenants);
        collect_tenants(&self.evidence, &mut tenants);
        collect_tenants(&self.actions, &mut tenants);
        collect_tenants(&self.tool_logs, &mut tenants);
        collect_tenants(&self.audit, &mut tenants);
        collect_tenants(&self.nodes, &mut tenants);
        collect_tenants(&self.edges, &mut tenants);
        collect_tenants(&self.outbox, &mut tenants);
        tenants
    }
}

type Partition = Arc<Mutex<Tables>>;

/// Shared, cloneable in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    partitions: Arc<StdMutex<BTreeMap<String, Partition>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn partition(&self, tenant: &str) -> Partition {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tenant.to_string())
            .or_default()
            .clone()
    }

    /// Every partition, in tenant order.
    fn all_partitions(&self) -> Vec<(String, Partition)> {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(tenant, partition)| (tenant.clone(), partition.clone()))
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, scope: Scope) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut held = Vec::new();
        match &scope {
            Scope::Tenant(tenant) => {
                let guard = self.partition(tenant.as_str()).lock_owned().await;
                held.push((tenant.to_string(), guard));
            }
            Scope::System => {
                for (tenant, partition) in self.all_partitions() {
                    held.push((tenant, partition.lock_owned().await));
                }
            }
        }

        let mut working = Tables::default();
        for (_, guard) in &held {
            working.append((**guard).clone());
        }
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            held,
            working,
            scope,
        }))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryUnitOfWork {
    store: MemoryStore,
    held: Vec<(String, OwnedMutexGuard<Tables>)>,
    working: Tables,
    scope: Scope,
}

fn visible<'a, T: Row>(scope: &'a Scope, rows: &'a [T]) -> impl DoubleEndedIterator<Item = &'a T> + 'a {
    rows.iter().filter(move |r| scope.admits(r.row_tenant()))
}

fn find<T: Row>(scope: &Scope, rows: &[T], id: Uuid) -> Option<T> {
    visible(scope, rows).find(|r| r.row_id() == id).cloned()
}

fn insert<T: Row>(scope: &Scope, rows: &mut Vec<T>, row: &T) -> StoreResult<()> {
    check_tenant(scope, row.row_tenant())?;
    rows.push(row.clone());
    Ok(())
}

/// Replace the stored row if `version` still matches, bumping version and `updated_at`.
fn update<T: Versioned>(scope: &Scope, rows: &mut [T], row: &T, entity: &'static str) -> StoreResult<T> {
    check_tenant(scope, row.row_tenant())?;
    let id = row.row_id();
    let slot = rows
        .iter_mut()
        .find(|r| r.row_id() == id && scope.admits(r.row_tenant()))
        .ok_or(StoreError::NotFound { entity, id })?;
    if slot.version() != row.version() {
        return Err(StoreError::StaleVersion { entity, id });
    }
    let mut next = row.clone();
    next.bump(Utc::now());
    *slot = next.clone();
    Ok(next)
}

fn newest_first<T: Row>(scope: &Scope, rows: &[T], keep: impl Fn(&T) -> bool) -> Vec<T> {
    visible(scope, rows).filter(|r| keep(r)).rev().cloned().collect()
}

fn oldest_first<T: Row>(scope: &Scope, rows: &[T], keep: impl Fn(&T) -> bool) -> Vec<T> {
    visible(scope, rows).filter(|r| keep(r)).cloned().collect()
}

#[async_trait]
impl AlertRepository for MemoryUnitOfWork {
    async fn insert_alert(&mut self, alert: &Alert) -> StoreResult<()> {
        let taken = self
            .working
            .alerts
            .iter()
            .any(|a| a.tenant_id == alert.tenant_id && a.external_id == alert.external_id);
        if taken {
            return Err(StoreError::Conflict {
                entity: "Alert",
                key: alert.external_id.clone(),
            });
        }
        insert(&self.scope, &mut self.working.alerts, alert)
    }

    async fn update_alert(&mut self, alert: &Alert) -> StoreResult<Alert> {
        update(&self.scope, &mut self.working.alerts, alert, "Alert")
    }

    async fn find_alert(&mut self, id: Uuid) -> StoreResult<Option<Alert>> {
        Ok(find(&self.scope, &self.working.alerts, id))
    }

    async fn find_alert_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Alert>> {
        Ok(visible(&self.scope, &self.working.alerts)
            .find(|a| a.external_id == external_id)
            .cloned())
    }

    async fn list_alerts_by_status(&mut self, status: AlertStatus) -> StoreResult<Vec<Alert>> {
        Ok(newest_first(&self.scope, &self.working.alerts, |a| a.status == status))
    }

    async fn list_alerts_by_incident(&mut self, incident_id: Uuid) -> StoreResult<Vec<Alert>> {
        Ok(oldest_first(&self.scope, &self.working.alerts, |a| {
            a.incident_id == Some(incident_id)
        }))
    }
}

#[async_trait]
impl IncidentRepository for MemoryUnitOfWork {
    async fn insert_incident(&mut self, incident: &Incident) -> StoreResult<()> {
        let taken = self
            .working
            .incidents
            .iter()
            .any(|i| i.tenant_id == incident.tenant_id && i.external_id == incident.external_id);
        if taken {
            return Err(StoreError::Conflict {
                entity: "Incident",
                key: incident.external_id.clone(),
            });
        }
        insert(&self.scope, &mut self.working.incidents, incident)
    }

    async fn update_incident(&mut self, incident: &Incident) -> StoreResult<Incident> {
        update(&self.scope, &mut self.working.incidents, incident, "Incident")
    }

    async fn find_incident(&mut self, id: Uuid) -> StoreResult<Option<Incident>> {
        Ok(find(&self.scope, &self.working.incidents, id))
    }

    async fn find_incident_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<Incident>> {
        Ok(visible(&self.scope, &self.working.incidents)
            .find(|i| i.external_id == external_id)
            .cloned())
    }

    async fn list_incidents(&mut self, status: Option<IncidentStatus>) -> StoreResult<Vec<Incident>> {
        Ok(newest_first(&self.scope, &self.working.incidents, |i| {
            status.map_or(true, |s| i.status == s)
        }))
    }
}

#[async_trait]
impl IncidentEventRepository for MemoryUnitOfWork {
    async fn insert_event(&mut self, event: &IncidentEvent) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.events, event)
    }

    async fn list_events(&mut self, incident_id: Uuid) -> StoreResult<Vec<IncidentEvent>> {
        Ok(oldest_first(&self.scope, &self.working.events, |e| e.incident_id == incident_id))
    }
}

#[async_trait]
impl HypothesisRepository for MemoryUnitOfWork {
    async fn insert_hypothesis(&mut self, hypothesis: &Hypothesis) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.hypotheses, hypothesis)
    }

    async fn list_hypotheses(&mut self, incident_id: Uuid) -> StoreResult<Vec<Hypothesis>> {
        Ok(newest_first(&self.scope, &self.working.hypotheses, |h| {
            h.incident_id == incident_id
        }))
    }
}

#[async_trait]
impl EvidenceRepository for MemoryUnitOfWork {
    async fn insert_evidence(&mut self, evidence: &Evidence) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.evidence, evidence)
    }

    async fn list_evidence(&mut self, incident_id: Uuid) -> StoreResult<Vec<Evidence>> {
        Ok(newest_first(&self.scope, &self.working.evidence, |e| e.incident_id == incident_id))
    }
}

#[async_trait]
impl ActionRepository for MemoryUnitOfWork {
    async fn insert_action(&mut self, action: &Action) -> StoreResult<()> {
        if let Some(key) = &action.idempotency_key {
            let taken = self
                .working
                .actions
                .iter()
                .any(|a| a.tenant_id == action.tenant_id && a.idempotency_key.as_ref() == Some(key));
            if taken {
                return Err(StoreError::Conflict {
                    entity: "Action",
                    key: key.clone(),
                });
            }
        }
        insert(&self.scope, &mut self.working.actions, action)
    }

    async fn update_action(&mut self, action: &Action) -> StoreResult<Action> {
        update(&self.scope, &mut self.working.actions, action, "Action")
    }

    async fn find_action(&mut self, id: Uuid) -> StoreResult<Option<Action>> {
        Ok(find(&self.scope, &self.working.actions, id))
    }

    async fn find_action_by_idempotency_key(&mut self, key: &str) -> StoreResult<Option<Action>> {
        Ok(visible(&self.scope, &self.working.actions)
            .find(|a| a.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_actions(&mut self, incident_id: Uuid) -> StoreResult<Vec<Action>> {
        Ok(newest_first(&self.scope, &self.working.actions, |a| a.incident_id == incident_id))
    }
}

#[async_trait]
impl ToolExecutionLogRepository for MemoryUnitOfWork {
    async fn insert_tool_log(&mut self, log: &ToolExecutionLog) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.tool_logs, log)
    }

    async fn find_tool_log(&mut self, id: Uuid) -> StoreResult<Option<ToolExecutionLog>> {
        Ok(find(&self.scope, &self.working.tool_logs, id))
    }
}

#[async_trait]
impl AuditLogRepository for MemoryUnitOfWork {
    async fn insert_audit(&mut self, entry: &AuditLog) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.audit, entry)
    }

    async fn list_audit(&mut self, entity_id: Uuid) -> StoreResult<Vec<AuditLog>> {
        Ok(oldest_first(&self.scope, &self.working.audit, |a| a.entity_id == entity_id))
    }
}

#[async_trait]
impl CorrelationNodeRepository for MemoryUnitOfWork {
    async fn insert_node(&mut self, node: &CorrelationNode) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.nodes, node)
    }

    async fn find_node(&mut self, id: Uuid) -> StoreResult<Option<CorrelationNode>> {
        Ok(find(&self.scope, &self.working.nodes, id))
    }

    async fn list_nodes(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationNode>> {
        Ok(oldest_first(&self.scope, &self.working.nodes, |n| n.incident_id == incident_id))
    }
}

#[async_trait]
impl CorrelationEdgeRepository for MemoryUnitOfWork {
    async fn insert_edge(&mut self, edge: &CorrelationEdge) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.edges, edge)
    }

    async fn list_edges(&mut self, incident_id: Uuid) -> StoreResult<Vec<CorrelationEdge>> {
        Ok(oldest_first(&self.scope, &self.working.edges, |e| e.incident_id == incident_id))
    }
}

#[async_trait]
impl OutboxRepository for MemoryUnitOfWork {
    async fn insert_outbox(&mut self, event: &OutboxEvent) -> StoreResult<()> {
        insert(&self.scope, &mut self.working.outbox, event)
    }

    async fn list_unpublished(&mut self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut pending: Vec<OutboxEvent> = visible(&self.scope, &self.working.outbox)
            .filter(|e| !e.published)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_published(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let scope = &self.scope;
        let event = self
            .working
            .outbox
            .iter_mut()
            .find(|e| e.id == id && scope.admits(&e.tenant_id))
            .ok_or(StoreError::NotFound {
                entity: "OutboxEvent",
                id,
            })?;
        event.mark_published(at);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn scope(&self) -> &Scope {
        &self.scope
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork {
            store,
            mut held,
            mut working,
            ..
        } = *self;
        for (tenant, guard) in held.iter_mut() {
            **guard = working.take_tenant(tenant);
        }
        drop(held);

        // Rows a system unit wrote for tenants that had no partition at begin.
        for tenant in working.tenants() {
            let partition = store.partition(&tenant);
            let mut guard = partition.lock().await;
            guard.append(working.take_tenant(&tenant));
        }
        Ok(())
    }
}
