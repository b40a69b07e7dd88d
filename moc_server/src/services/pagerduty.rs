//! PagerDuty V2 webhook payloads, signature check and normalization.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::models::{AlertSeverity, IncidentSeverity};
use crate::services::webhook_service::NormalizedAlert;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-pagerduty-signature";

/// Messages stay raw until [`PagerDutyPayload::decode_messages`], so one
/// malformed message does not reject its siblings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagerDutyPayload {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

impl PagerDutyPayload {
    pub fn decode_messages(self) -> Vec<Result<Message, serde_json::Error>> {
        self.messages.into_iter().map(serde_json::from_value).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub event: Option<String>,
    pub incident: Option<Incident>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_number: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub urgency: Option<String>,
    pub html_url: Option<String>,
    pub service: Option<Service>,
    pub alert_counts: Option<AlertCounts>,
    pub incident_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AlertCounts {
    #[serde(default)]
    pub triggered: i64,
    #[serde(default)]
    pub acknowledged: i64,
    #[serde(default)]
    pub resolved: i64,
}

/// Validate a PagerDuty `X-PagerDuty-Signature` header (`v1=<hex>`).
/// Several comma-separated signatures may be present during secret rotation.
pub fn validate_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("PagerDuty webhook secret not configured, skipping validation");
        return true;
    }

    header.split(',').map(str::trim).any(|signature| {
        let sig = signature.strip_prefix("v1=").unwrap_or(signature);
        let sig_bytes = match hex::decode(sig) {
            Ok(b) => b,
            Err(_) => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(payload);

        mac.verify_slice(&sig_bytes).is_ok()
    })
}

fn alert_severity(urgency: Option<&str>) -> AlertSeverity {
    match urgency.map(str::to_ascii_lowercase).as_deref() {
        Some("high") => AlertSeverity::Critical,
        _ => AlertSeverity::Warning,
    }
}

fn incident_severity(urgency: Option<&str>) -> IncidentSeverity {
    match urgency.map(str::to_ascii_lowercase).as_deref() {
        Some("high") => IncidentSeverity::Sev1,
        _ => IncidentSeverity::Sev3,
    }
}

/// Map one message onto the source-agnostic alert shape.
pub fn normalize(event: Option<&str>, incident: &Incident) -> NormalizedAlert {
    let service_id = incident.service.as_ref().map(|s| s.id.as_str());
    let incident_key = incident.incident_key.as_deref().unwrap_or(&incident.id);
    let urgency = incident.urgency.as_deref();

    NormalizedAlert {
        dedup_key: format!("pd:{}:{}", service_id.unwrap_or("unknown"), incident_key),
        title: incident.title.clone(),
        description: incident.description.clone(),
        source: "pagerduty".to_string(),
        severity: alert_severity(urgency),
        incident_external_id: format!("pd-incident:{}", incident.id),
        incident_title: format!("[PD] {}", incident.title),
        incident_severity: incident_severity(urgency),
        labels: json!({
            "source": "pagerduty",
            "pd_service_id": service_id.unwrap_or_default(),
            "pd_service_name": incident
                .service
                .as_ref()
                .and_then(|s| s.name.as_deref())
                .unwrap_or_default(),
            "pd_incident_id": incident.id,
            "pd_event": event.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(urgency: Option<&str>, key: Option<&str>, service: bool) -> Incident {
        Incident {
            id: "PABC123".into(),
            incident_number: Some(42),
            title: "DB connection pool exhausted".into(),
            description: Some("pool at 100%".into()),
            status: Some("triggered".into()),
            urgency: urgency.map(Into::into),
            html_url: None,
            service: service.then(|| Service {
                id: "PSVC1".into(),
                name: Some("checkout".into()),
                description: None,
            }),
            alert_counts: None,
            incident_key: key.map(Into::into),
        }
    }

    #[test]
    fn high_urgency_maps_to_critical_and_sev1() {
        let n = normalize(Some("incident.trigger"), &incident(Some("HIGH"), Some("key-1"), true));
        assert_eq!(n.dedup_key, "pd:PSVC1:key-1");
        assert_eq!(n.severity, AlertSeverity::Critical);
        assert_eq!(n.incident_severity, IncidentSeverity::Sev1);
        assert_eq!(n.incident_external_id, "pd-incident:PABC123");
        assert_eq!(n.incident_title, "[PD] DB connection pool exhausted");
        assert_eq!(n.labels["pd_service_name"], "checkout");
        assert_eq!(n.labels["pd_event"], "incident.trigger");
    }

    #[test]
    fn missing_service_and_key_fall_back() {
        let n = normalize(None, &incident(None, None, false));
        assert_eq!(n.dedup_key, "pd:unknown:PABC123");
        assert_eq!(n.severity, AlertSeverity::Warning);
        assert_eq!(n.incident_severity, IncidentSeverity::Sev3);
        assert_eq!(n.labels["pd_service_id"], "");
        assert_eq!(n.labels["pd_event"], "");
    }

    #[test]
    fn low_urgency_is_warning() {
        let n = normalize(None, &incident(Some("low"), None, true));
        assert_eq!(n.severity, AlertSeverity::Warning);
        assert_eq!(n.incident_severity, IncidentSeverity::Sev3);
    }

    #[test]
    fn messages_decode_independently() {
        let payload: PagerDutyPayload = serde_json::from_value(json!({
            "messages": [
                { "event": "incident.trigger", "incident": { "id": "P1", "title": "ok" } },
                { "event": "incident.trigger", "incident": { "id": "P2" } },
                { "event": "ping" }
            ]
        }))
        .unwrap();
        let decoded = payload.decode_messages();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().incident.as_ref().unwrap().id, "P1");
        assert!(decoded[1].is_err());
        assert!(decoded[2].as_ref().unwrap().incident.is_none());
    }

    #[test]
    fn signature_accepts_any_matching_v1_entry() {
        let body = br#"{"messages":[]}"#;
        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(body);
        let good = hex::encode(mac.finalize().into_bytes());

        assert!(validate_signature("s3cret", body, &format!("v1=deadbeef, v1={good}")));
        assert!(!validate_signature("s3cret", body, "v1=deadbeef"));
        assert!(!validate_signature("s3cret", body, "v1=not-hex"));
        assert!(validate_signature("", body, ""));
    }
}
