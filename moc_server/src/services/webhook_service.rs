//! Webhook alert ingestion: dedup, find-or-create incident, correlate.

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppResult;
use crate::events::{AlertReceived, DomainEvent};
use crate::models::{Alert, AlertSeverity, Incident, IncidentEvent, IncidentSeverity};
use crate::services::{incident_service, outbox};
use crate::store::UnitOfWork;

const WEBHOOK_PRINCIPAL: &str = "webhook_ingestion";

/// Source-agnostic alert produced by a webhook normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAlert {
    pub dedup_key: String,
    pub title: String,
    pub description: Option<String>,
    pub source: String,
    pub severity: AlertSeverity,
    pub incident_external_id: String,
    pub incident_title: String,
    pub incident_severity: IncidentSeverity,
    pub labels: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    pub alert_id: Uuid,
    pub incident_id: Option<Uuid>,
    pub new_incident: bool,
    pub deduplicated: bool,
}

/// Ingest one alert. The caller commits the unit of work, so a failure
/// anywhere leaves neither alert, incident nor outbox row behind.
pub async fn ingest(uow: &mut dyn UnitOfWork, normalized: NormalizedAlert) -> AppResult<WebhookResult> {
    let tenant = uow.tenant()?.to_string();

    if let Some(existing) = uow.find_alert_by_external_id(&normalized.dedup_key).await? {
        crate::metrics::webhook_dedup("hit");
        tracing::info!(dedup_key = %normalized.dedup_key, alert_id = %existing.id, "Dedup hit: alert already exists");
        return Ok(WebhookResult {
            alert_id: existing.id,
            incident_id: existing.incident_id,
            new_incident: false,
            deduplicated: true,
        });
    }
    crate::metrics::webhook_dedup("miss");

    let (incident, new_incident) = match uow
        .find_incident_by_external_id(&normalized.incident_external_id)
        .await?
    {
        Some(incident) => {
            tracing::info!(
                incident_id = %incident.id,
                external_id = %incident.external_id,
                "Attaching alert to existing incident"
            );
            (incident, false)
        }
        None => {
            let incident = Incident::new(
                &tenant,
                normalized.incident_external_id.clone(),
                normalized.incident_title.clone(),
                None,
                normalized.incident_severity,
                None,
                json!({}),
            );
            incident_service::open_incident(uow, &incident, json!({ "source": "pagerduty_webhook" })).await?;
            crate::metrics::webhook_incident_created();
            (incident, true)
        }
    };

    let mut alert = Alert::new(
        &tenant,
        normalized.dedup_key.clone(),
        normalized.title,
        normalized.description,
        normalized.source,
        normalized.severity,
        normalized.labels,
    );
    alert.created_by = WEBHOOK_PRINCIPAL.to_string();
    alert.link_to_incident(incident.id);
    uow.insert_alert(&alert).await?;
    crate::metrics::alert_ingested(alert.severity.as_str());

    uow.insert_event(&IncidentEvent::alert_correlated(&tenant, incident.id, alert.id, &alert.title))
        .await?;

    outbox::append(
        uow,
        DomainEvent::AlertReceived(AlertReceived {
            alert_id: alert.id,
            external_id: alert.external_id.clone(),
            title: alert.title.clone(),
            source: alert.source.clone(),
            severity: alert.severity.to_string(),
            incident_id: incident.id,
            new_incident,
        }),
    )
    .await?;

    tracing::info!(
        alert_id = %alert.id,
        dedup_key = %normalized.dedup_key,
        incident_id = %incident.id,
        new_incident,
        "Alert ingested via webhook"
    );
    Ok(WebhookResult {
        alert_id: alert.id,
        incident_id: Some(incident.id),
        new_incident,
        deduplicated: false,
    })
}
