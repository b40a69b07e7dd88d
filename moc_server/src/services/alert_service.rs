//! Alert ingestion through the REST API, plus lookup and status updates.

use std::collections::BTreeMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::{AlertCreated, DomainEvent};
use crate::models::{Alert, AlertSeverity, AlertStatus};
use crate::policy::alert_policy::INGEST_ALERT;
use crate::policy::{AlertPolicyEvaluator, PolicyContext, PolicyEngine};
use crate::services::outbox;
use crate::store::UnitOfWork;
use crate::validation::{Validate, Violations};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAlertRequest {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub severity: Option<AlertSeverity>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Validate for IngestAlertRequest {
    fn validate(&self) -> Result<(), AppError> {
        Violations::new()
            .not_blank("externalId", self.external_id.as_deref())
            .not_blank("title", self.title.as_deref())
            .not_blank("source", self.source.as_deref())
            .not_null("severity", self.severity.as_ref())
            .finish()
    }
}

/// Dedup through the alert policy, then persist with an `ALERT_CREATED` event.
/// A denied alert writes nothing.
pub async fn ingest(uow: &mut dyn UnitOfWork, request: IngestAlertRequest) -> AppResult<Alert> {
    request.validate()?;
    let tenant = uow.tenant()?.to_string();
    let external_id = request.external_id.unwrap_or_default();
    let severity = request.severity.unwrap_or(AlertSeverity::Info);
    let source = request.source.unwrap_or_default();

    let is_duplicate = uow.find_alert_by_external_id(&external_id).await?.is_some();
    let context = PolicyContext::new(INGEST_ALERT, "Alert")
        .attribute("externalId", external_id.as_str())
        .attribute("severity", severity.as_str())
        .attribute("source", source.as_str())
        .attribute("isDuplicate", is_duplicate);
    let decision = AlertPolicyEvaluator.evaluate(&context);

    if !decision.is_allowed() {
        tracing::info!(external_id = %external_id, reason = %decision.reason, "Alert ingestion denied");
        return Err(AppError::PolicyDenied(decision.reason));
    }

    let mut alert = Alert::new(
        &tenant,
        external_id,
        request.title.unwrap_or_default(),
        request.description,
        source,
        severity,
        serde_json::to_value(&request.labels)?,
    );
    alert.policy_decision_reason = Some(decision.reason);
    uow.insert_alert(&alert).await?;

    outbox::append(
        uow,
        DomainEvent::AlertCreated(AlertCreated {
            id: alert.id,
            external_id: alert.external_id.clone(),
            title: alert.title.clone(),
            source: alert.source.clone(),
            severity: alert.severity.to_string(),
            status: alert.status.to_string(),
            policy_decision_reason: alert.policy_decision_reason.clone(),
        }),
    )
    .await?;

    crate::metrics::alert_ingested(alert.severity.as_str());
    tracing::info!(
        alert_id = %alert.id,
        external_id = %alert.external_id,
        severity = %alert.severity,
        tenant = %tenant,
        "Alert ingested"
    );
    Ok(alert)
}

pub async fn find(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Alert> {
    uow.find_alert(id)
        .await?
        .ok_or_else(|| AppError::alert_not_found(id))
}

/// Newest first.
pub async fn list_by_status(uow: &mut dyn UnitOfWork, status: AlertStatus) -> AppResult<Vec<Alert>> {
    Ok(uow.list_alerts_by_status(status).await?)
}

pub async fn acknowledge(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Alert> {
    let mut alert = find(uow, id).await?;
    alert.acknowledge();
    Ok(uow.update_alert(&alert).await?)
}

pub async fn resolve(uow: &mut dyn UnitOfWork, id: Uuid) -> AppResult<Alert> {
    let mut alert = find(uow, id).await?;
    alert.resolve();
    Ok(uow.update_alert(&alert).await?)
}
