//! Prometheus metrics for control-plane observability.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and return a handle for `GET /metrics`.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    match builder.install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
            None
        }
    }
}

/// Record an alert accepted by ingestion.
pub fn alert_ingested(severity: &str) {
    counter!("moc_alerts_ingested_total", "severity" => severity.to_string()).increment(1);
}

/// Record a webhook dedup lookup (`hit` or `miss`).
pub fn webhook_dedup(result: &'static str) {
    counter!("moc_webhook_dedup_total", "result" => result).increment(1);
}

pub fn webhook_incident_created() {
    counter!("moc_webhook_incidents_created_total").increment(1);
}

/// Record a proposal outcome (`auto_approved`, `escalated`, `rejected`).
pub fn action_proposed(outcome: &'static str) {
    counter!("moc_actions_proposed_total", "outcome" => outcome).increment(1);
}

/// Record a terminal execution status of an action.
pub fn action_executed(status: &str) {
    counter!("moc_actions_executed_total", "status" => status.to_string()).increment(1);
}

pub fn action_retried() {
    counter!("moc_actions_retried_total").increment(1);
}

/// Record one tool invocation and its wall time.
pub fn tool_executed(tool: &str, status: &str, duration_ms: u64) {
    counter!(
        "moc_tool_executions_total",
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("moc_tool_duration_ms", "tool" => tool.to_string()).record(duration_ms as f64);
}

/// Record a triage run (`completed`, `cached`, `budget_exceeded`).
pub fn triage_run(result: &'static str) {
    counter!("moc_triage_runs_total", "result" => result).increment(1);
}

pub fn triage_tokens(tokens: u64) {
    histogram!("moc_triage_tokens_used").record(tokens as f64);
}

pub fn outbox_published(count: u64) {
    counter!("moc_outbox_published_total").increment(count);
}

pub fn outbox_publish_failed() {
    counter!("moc_outbox_publish_failures_total").increment(1);
}
