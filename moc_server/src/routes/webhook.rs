//! PagerDuty webhook handler: tenant from the path, one unit of work per message.
//!
//! A message that fails to decode or ingest is logged and skipped; the rest of
//! the payload is still accepted.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::services::pagerduty::{self, PagerDutyPayload};
use crate::services::webhook_service::{self, WebhookResult};
use crate::store::Scope;
use crate::tenant::{self, TenantId};

#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub status: &'static str,
    pub processed: usize,
    pub skipped: usize,
    pub results: Vec<WebhookResult>,
    pub timestamp: DateTime<Utc>,
}

pub async fn pagerduty(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<WebhookAccepted>)> {
    let tenant = TenantId::parse(&tenant_id).ok_or(AppError::MissingTenant)?;

    let signature = headers
        .get(pagerduty::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !pagerduty::validate_signature(&state.config.pagerduty_webhook_secret, &body, signature) {
        tracing::warn!(tenant = %tenant, "PagerDuty webhook signature validation failed");
        return Err(AppError::Unauthorized);
    }

    let payload: PagerDutyPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidPayload(format!("Malformed PagerDuty payload: {e}")))?;
    if payload.messages.is_empty() {
        return Err(AppError::InvalidPayload("No messages in payload".to_string()));
    }

    let Processed { results, skipped } = tenant::scope(tenant.clone(), process(&state, tenant, payload)).await;
    tracing::info!(processed = results.len(), skipped, "PagerDuty webhook processed");

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            status: "accepted",
            processed: results.len(),
            skipped,
            results,
            timestamp: Utc::now(),
        }),
    ))
}

struct Processed {
    results: Vec<WebhookResult>,
    skipped: usize,
}

async fn process(state: &AppState, tenant: TenantId, payload: PagerDutyPayload) -> Processed {
    let mut processed = Processed {
        results: Vec::with_capacity(payload.messages.len()),
        skipped: 0,
    };
    for (index, message) in payload.decode_messages().into_iter().enumerate() {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed PagerDuty message");
                processed.skipped += 1;
                continue;
            }
        };
        let Some(incident) = message.incident else {
            tracing::debug!(index, event = ?message.event, "Skipping PagerDuty message without incident");
            continue;
        };

        let normalized = pagerduty::normalize(message.event.as_deref(), &incident);
        match ingest_one(state, &tenant, normalized).await {
            Ok(result) => processed.results.push(result),
            Err(e) => {
                tracing::error!(index, pd_incident = %incident.id, error = %e, "Failed to ingest PagerDuty message");
                processed.skipped += 1;
            }
        }
    }
    processed
}

async fn ingest_one(
    state: &AppState,
    tenant: &TenantId,
    normalized: webhook_service::NormalizedAlert,
) -> AppResult<WebhookResult> {
    let mut uow = state.store.begin(Scope::Tenant(tenant.clone())).await?;
    let result = webhook_service::ingest(uow.as_mut(), normalized).await?;
    uow.commit().await?;
    Ok(result)
}
