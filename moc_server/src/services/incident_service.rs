//! Incident lifecycle: creation, transitions, hypotheses and evidence.
//!
//! Every mutation writes its timeline entry and audit row through the same
//! unit of work as the entity itself.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, IncidentCreated};
use crate::models::{
    AuditLog, Evidence, EvidenceType, Hypothesis, HypothesisSource, Incident, IncidentEvent,
    IncidentSeverity, IncidentStatus,
};
use crate::services::outbox;
use crate::store::UnitOfWork;
use crate::validation::{Validate, Violations};

pub const ENTITY_INCIDENT: &str = "INCIDENT";
pub const ENTITY_HYPOTHESIS: &str = "HYPOTHESIS";
pub const ENTITY_EVIDENCE: &str = "EVIDENCE";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncidentRequest {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub severity: Option<IncidentSeverity>,
    pub commander_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Validate for CreateIncidentRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_blank("externalId", self.external_id.as_deref())
            .not_blank("title", self.title.as_deref())
            .not_null("severity", self.severity.as_ref())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHypothesisRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<HypothesisSource>,
    pub evidence_for: Option<String>,
    pub evidence_against: Option<String>,
    pub next_best_test: Option<String>,
    pub stop_condition: Option<String>,
    /// Set by triage, never by clients.
    #[serde(skip)]
    pub evidence_hash: Option<String>,
}

impl Validate for AddHypothesisRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_blank("title", self.title.as_deref())
            .in_range("confidence", self.confidence, 0.0, 1.0)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEvidenceRequest {
    pub hypothesis_id: Option<Uuid>,
    pub evidence_type: Option<EvidenceType>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub source_url: Option<String>,
}

impl Validate for AddEvidenceRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_null("evidenceType", self.evidence_type.as_ref())
            .not_blank("title", self.title.as_deref())
            .finish()
    }
}

/// Insert a fresh incident with its `CREATED` timeline entry, audit row and
/// `INCIDENT_CREATED` event. `audit_extra` is merged into the audit state.
pub(crate) async fn open_incident(
    uow: &mut dyn UnitOfWork,
    incident: &Incident,
    audit_extra: serde_json::Value,
) -> AppResult<()> {
    uow.insert_incident(incident).await?;

    uow.insert_event(&IncidentEvent::created(
        &incident.tenant_id,
        incident.id,
        &incident.title,
        incident.severity.as_str(),
    ))
    .await?;

    let mut state = json!({ "status": IncidentStatus::New, "severity": incident.severity });
    if let (Some(state), serde_json::Value::Object(extra)) = (state.as_object_mut(), audit_extra) {
        state.extend(extra);
    }
    uow.insert_audit(&AuditLog::created(
        &incident.tenant_id,
        incident.id,
        ENTITY_INCIDENT,
        incident.id,
        state,
    ))
    .await?;

    outbox::append(
        uow,
        DomainEvent::IncidentCreated(IncidentCreated {
            id: incident.id,
            external_id: incident.external_id.clone(),
            title: incident.title.clone(),
            severity: incident.severity.to_string(),
            status: incident.status.to_string(),
            commander_name: incident.commander_name.clone(),
        }),
    )
    .await?;

    tracing::info!(
        incident_id = %incident.id,
        title = %incident.title,
        severity = %incident.severity,
        "Incident created"
    );
    Ok(())
}

/// Idempotent on `externalId`: a repeat returns the stored incident unchanged.
pub async fn create(uow: &mut dyn UnitOfWork, request: CreateIncidentRequest) -> AppResult<Incident> {
    request.validate()?;
    let tenant = uow.tenant()?.to_string();
    let external_id = request.external_id.unwrap_or_default();

    if let Some(existing) = uow.find_incident_by_external_id(&external_id).await? {
        tracing::info!(external_id = %external_id, "Idempotent hit: incident already exists");
        return Ok(existing);
    }

    let incident = Incident::new(
        &tenant,
        external_id,
        request.title.unwrap_or_default(),
        request.summary,
        request.severity.unwrap_or(IncidentSeverity::Sev3),
        request.commander_name,
        serde_json::to_value(&request.tags)?,
    );
    open_incident(uow, &incident, json!({})).await?;
    Ok(incident)
}

pub async fn find(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Incident> {
    uow.find_incident(id)
        .await?
        .ok_or_else(|| AppError::incident_not_found(id))
}

/// Newest first; `None` lists every status.
pub async fn list(uow: &mut dyn UnitOfWork, status: Option<IncidentStatus>) -> AppResult<Vec<Incident>> {
    Ok(uow.list_incidents(status).await?)
}

pub async fn transition(uow: &mut dyn UnitOfWork, id: Uuid, target: IncidentStatus) -> AppResult<Incident> {
    let mut incident = find(uow, id).await?;
    let previous = incident.transition_to(target)?;
    let incident = uow.update_incident(&incident).await?;

    uow.insert_event(&IncidentEvent::status_changed(&incident.tenant_id, id, previous, target))
        .await?;
    uow.insert_audit(&AuditLog::status_changed(
        &incident.tenant_id,
        id,
        ENTITY_INCIDENT,
        id,
        json!({ "status": previous }),
        json!({ "status": target }),
    ))
    .await?;

    tracing::info!(incident_id = %id, from = %previous, to = %target, "Incident transitioned");
    Ok(incident)
}

/// Oldest first.
pub async fn timeline(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Vec<IncidentEvent>> {
    find(uow, id).await?;
    Ok(uow.list_events(id).await?)
}

/// Newest first.
pub async fn hypotheses(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Vec<Hypothesis>> {
    find(uow, id).await?;
    Ok(uow.list_hypotheses(id).await?)
}

/// Newest first.
pub async fn evidence(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Vec<Evidence>> {
    find(uow, id).await?;
    Ok(uow.list_evidence(id).await?)
}

pub async fn add_hypothesis(
    uow: &mut dyn UnitOfWork,
    incident_id: Uuid,
    request: AddHypothesisRequest,
) -> AppResult<Hypothesis> {
    request.validate()?;
    let incident = find(uow, incident_id).await?;
    let title = request.title.unwrap_or_default();
    let source = request.source.unwrap_or(HypothesisSource::Human);

    let mut hypothesis = Hypothesis::new(
        &incident.tenant_id,
        incident_id,
        &title,
        request.description,
        request.confidence.unwrap_or(0.0),
        source,
    );
    hypothesis.evidence_for = request.evidence_for;
    hypothesis.evidence_against = request.evidence_against;
    hypothesis.next_best_test = request.next_best_test;
    hypothesis.stop_condition = request.stop_condition;
    hypothesis.evidence_hash = request.evidence_hash;
    uow.insert_hypothesis(&hypothesis).await?;

    uow.insert_event(&IncidentEvent::hypothesis_added(&incident.tenant_id, incident_id, &title))
        .await?;
    uow.insert_audit(&AuditLog::created(
        &incident.tenant_id,
        incident_id,
        ENTITY_HYPOTHESIS,
        hypothesis.id,
        json!({ "title": title, "source": source }),
    ))
    .await?;

    tracing::info!(
        incident_id = %incident_id,
        hypothesis_id = %hypothesis.id,
        source = %source,
        "Hypothesis added"
    );
    Ok(hypothesis)
}

pub async fn add_evidence(
    uow: &mut dyn UnitOfWork,
    incident_id: Uuid,
    request: AddEvidenceRequest,
) -> AppResult<Evidence> {
    request.validate()?;
    let incident = find(uow, incident_id).await?;
    let evidence_type = request.evidence_type.unwrap_or(EvidenceType::Note);
    let title = request.title.unwrap_or_default();

    let mut evidence = Evidence::new(&incident.tenant_id, incident_id, evidence_type, &title, request.content);
    evidence.hypothesis_id = request.hypothesis_id;
    evidence.source_url = request.source_url;
    uow.insert_evidence(&evidence).await?;

    uow.insert_event(&IncidentEvent::evidence_added(
        &incident.tenant_id,
        incident_id,
        &title,
        evidence_type.as_str(),
    ))
    .await?;
    uow.insert_audit(&AuditLog::created(
        &incident.tenant_id,
        incident_id,
        ENTITY_EVIDENCE,
        evidence.id,
        json!({ "type": evidence_type, "title": title }),
    ))
    .await?;

    tracing::info!(incident_id = %incident_id, evidence_id = %evidence.id, evidence_type = %evidence_type, "Evidence added");
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, IncidentEventType};
    use crate::store::{MemoryStore, Scope, Store};
    use crate::tenant::TenantId;

    pub(crate) fn create_request(external_id: &str) -> CreateIncidentRequest {
        CreateIncidentRequest {
            external_id: Some(external_id.into()),
            title: Some("Checkout latency".into()),
            summary: None,
            severity: Some(IncidentSeverity::Sev2),
            commander_name: Some("alice".into()),
            tags: BTreeMap::new(),
        }
    }

    async fn uow(store: &MemoryStore) -> Box<dyn UnitOfWork> {
        store
            .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_writes_timeline_audit_and_event() {
        let store = MemoryStore::new();
        let mut uow = uow(&store).await;
        let incident = create(uow.as_mut(), create_request("inc-1")).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::New);

        let events = uow.list_events(incident.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Incident created: Checkout latency");

        let audit = uow.list_audit(incident.id).await.unwrap();
        assert_eq!(audit[0].action, AuditAction::Created);
        assert_eq!(audit[0].new_state, Some(json!({"status": "NEW", "severity": "SEV2"})));

        let outbox = uow.list_unpublished(10).await.unwrap();
        assert_eq!(outbox[0].event_type, "INCIDENT_CREATED");
        assert_eq!(outbox[0].payload["commanderName"], "alice");
    }

    #[tokio::test]
    async fn create_is_idempotent_on_external_id() {
        let store = MemoryStore::new();
        let mut uow = uow(&store).await;
        let first = create(uow.as_mut(), create_request("inc-1")).await.unwrap();
        let second = create(uow.as_mut(), create_request("inc-1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(uow.list_events(first.id).await.unwrap().len(), 1);
        assert_eq!(uow.list_unpublished(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transition_follows_the_state_machine() {
        let store = MemoryStore::new();
        let mut uow = uow(&store).await;
        let incident = create(uow.as_mut(), create_request("inc-1")).await.unwrap();

        let err = transition(uow.as_mut(), incident.id, IncidentStatus::Resolved)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(find(uow.as_mut(), incident.id).await.unwrap().status, IncidentStatus::New);

        let triaging = transition(uow.as_mut(), incident.id, IncidentStatus::Triaging)
            .await
            .unwrap();
        assert_eq!(triaging.status, IncidentStatus::Triaging);
        let resolved = transition(uow.as_mut(), incident.id, IncidentStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);

        let events = timeline(uow.as_mut(), incident.id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            [
                IncidentEventType::Created,
                IncidentEventType::StatusChanged,
                IncidentEventType::StatusChanged
            ]
        );
        assert_eq!(events[2].description, "Status changed: TRIAGING → RESOLVED");
    }

    #[tokio::test]
    async fn hypothesis_defaults_to_human_source() {
        let store = MemoryStore::new();
        let mut uow = uow(&store).await;
        let incident = create(uow.as_mut(), create_request("inc-1")).await.unwrap();
        let hypothesis = add_hypothesis(
            uow.as_mut(),
            incident.id,
            AddHypothesisRequest {
                title: Some("Pool exhaustion".into()),
                confidence: Some(0.7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(hypothesis.source, HypothesisSource::Human);
        assert_eq!(hypothesis.confidence, 0.7);
        assert_eq!(hypotheses(uow.as_mut(), incident.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn evidence_requires_an_existing_incident() {
        let store = MemoryStore::new();
        let mut uow = uow(&store).await;
        let request = AddEvidenceRequest {
            hypothesis_id: None,
            evidence_type: Some(EvidenceType::Log),
            title: Some("stack trace".into()),
            content: Some("NPE".into()),
            source_url: None,
        };
        let err = add_evidence(uow.as_mut(), Uuid::new_v4(), request.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let incident = create(uow.as_mut(), create_request("inc-1")).await.unwrap();
        let evidence = add_evidence(uow.as_mut(), incident.id, request).await.unwrap();
        assert_eq!(evidence.evidence_type, EvidenceType::Log);
        let events = uow.list_events(incident.id).await.unwrap();
        assert_eq!(events.last().unwrap().description, "Evidence added: stack trace");
    }
}
