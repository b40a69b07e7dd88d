//! End-to-end tests: the full router over the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use moc_server::config::{MocConfig, ToolConfig};
use moc_server::services::bus::MemoryPublisher;
use moc_server::services::outbox::OutboxRelay;
use moc_server::services::rate_limiter::Unlimited;
use moc_server::services::tool_executor::ToolExecutor;
use moc_server::services::tools::{Tool, ToolRegistry, ToolRequest, ToolResponse};
use moc_server::store::{MemoryStore, Scope, Store};
use moc_server::{build_app, AppState};

const API_KEY: &str = "dev-api-key";
const TENANT: &str = "acme";

fn app_with(store: &MemoryStore, config: MocConfig) -> Router {
    build_app(AppState::new(config, Arc::new(store.clone()), None))
}

fn app(store: &MemoryStore) -> Router {
    app_with(store, MocConfig::default())
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn api(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY)
        .header("x-customer-id", TENANT)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn create_incident(app: &Router, external_id: &str) -> String {
    let (status, body) = call(
        app,
        api(
            "POST",
            "/api/v1/incidents",
            Some(json!({ "externalId": external_id, "title": "Checkout failing", "severity": "SEV2" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn propose(app: &Router, incident_id: &str, body: Value) -> Value {
    let (status, body) = call(
        app,
        api("POST", &format!("/api/v1/incidents/{incident_id}/actions/propose"), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

fn pd_message(incident_id: &str, incident_key: &str) -> Value {
    json!({
        "event": "incident.trigger",
        "incident": {
            "id": incident_id,
            "title": "API latency",
            "urgency": "high",
            "incident_key": incident_key,
            "service": { "id": "PSVC1", "name": "checkout" }
        }
    })
}

fn webhook(body: &Value, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{TENANT}/pagerduty"))
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-pagerduty-signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ── Access control ──

#[tokio::test]
async fn missing_api_key_is_unauthorized() {
    let store = MemoryStore::new();
    let request = Request::builder()
        .uri("/api/v1/tools")
        .header("x-customer-id", TENANT)
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app(&store), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn missing_tenant_is_bad_request() {
    let store = MemoryStore::new();
    let request = Request::builder()
        .uri("/api/v1/tools")
        .header("x-api-key", API_KEY)
        .header("x-customer-id", "  ")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app(&store), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "MISSING_TENANT");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn health_bypasses_auth() {
    let store = MemoryStore::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&app(&store), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;

    let request = Request::builder()
        .uri(format!("/api/v1/incidents/{incident_id}"))
        .header("x-api-key", API_KEY)
        .header("x-customer-id", "globex")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

// ── Incidents ──

#[tokio::test]
async fn incident_creation_is_idempotent_and_transitions_are_checked() {
    let store = MemoryStore::new();
    let app = app(&store);
    let first = create_incident(&app, "inc-42").await;
    let second = create_incident(&app, "inc-42").await;
    assert_eq!(first, second);

    let (status, body) = call(
        &app,
        api("POST", &format!("/api/v1/incidents/{first}/transition?status=RESOLVED"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_TRANSITION");

    let (status, body) = call(
        &app,
        api("POST", &format!("/api/v1/incidents/{first}/transition?status=TRIAGING"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "TRIAGING");

    let (_, timeline) = call(&app, api("GET", &format!("/api/v1/incidents/{first}/timeline"), None)).await;
    let types: Vec<&str> = timeline
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["eventType"].as_str().unwrap())
        .collect();
    assert_eq!(types, ["CREATED", "STATUS_CHANGED"]);
}

#[tokio::test]
async fn validation_errors_list_details() {
    let store = MemoryStore::new();
    let (status, body) = call(&app(&store), api("POST", "/api/v1/incidents", Some(json!({ "title": " " })))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(!body["details"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn triage_with_mock_llm_adds_hypotheses() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-7").await;
    let (status, _) = call(
        &app,
        api(
            "POST",
            &format!("/api/v1/incidents/{incident_id}/evidence"),
            Some(json!({ "evidenceType": "LOG", "title": "pool errors", "content": "timeout acquiring connection" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/v1/incidents/{incident_id}/triage");
    let (status, first) = call(&app, api("POST", &uri, None)).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["cached"], false);
    assert_eq!(first["hypotheses"].as_array().unwrap().len(), 3);

    let (_, second) = call(&app, api("POST", &uri, None)).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["evidenceHash"], first["evidenceHash"]);
}

// ── Actions ──

#[tokio::test]
async fn read_action_is_auto_approved() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let action = propose(
        &app,
        &incident_id,
        json!({ "toolName": "logs", "riskLevel": "READ", "proposedBy": "alice" }),
    )
    .await;
    assert_eq!(action["status"], "APPROVED");
    assert!(action["policyAppliedRules"].as_str().unwrap().contains("read_auto_approve_rule"));
}

#[tokio::test]
async fn dangerous_action_is_rejected_with_201() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let action = propose(&app, &incident_id, json!({ "toolName": "deploy", "riskLevel": "DANGEROUS" })).await;
    assert_eq!(action["status"], "REJECTED");
    assert!(action["policyAppliedRules"].as_str().unwrap().contains("dangerous_block_rule"));
}

#[tokio::test]
async fn unknown_tool_is_rejected_with_201() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let action = propose(&app, &incident_id, json!({ "toolName": "mystery", "riskLevel": "READ" })).await;
    assert_eq!(action["status"], "REJECTED");
    assert!(action["policyAppliedRules"].as_str().unwrap().contains("tool_allowlist_rule"));
}

#[tokio::test]
async fn safe_write_action_runs_to_completion() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let action = propose(
        &app,
        &incident_id,
        json!({ "toolName": "logs", "riskLevel": "SAFE_WRITE", "parameters": { "service": "checkout" } }),
    )
    .await;
    assert_eq!(action["status"], "APPROVED");
    let action_id = action["id"].as_str().unwrap();

    let (status, done) = call(
        &app,
        api("POST", &format!("/api/v1/incidents/{incident_id}/actions/{action_id}/execute"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{done}");
    assert_eq!(done["status"], "COMPLETED");
    assert!(done["toolExecutionId"].is_string());
    assert_eq!(done["canRetry"], false);

    let (status, again) = call(
        &app,
        api("POST", &format!("/api/v1/incidents/{incident_id}/actions/{action_id}/execute"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"], "INVALID_ACTION_TRANSITION");

    let (_, evidence) = call(&app, api("GET", &format!("/api/v1/incidents/{incident_id}/evidence"), None)).await;
    assert_eq!(evidence.as_array().unwrap().len(), 1);
    assert_eq!(evidence[0]["evidenceType"], "TOOL_OUTPUT");
}

#[tokio::test]
async fn proposal_with_idempotency_key_is_stored_once() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let body = json!({ "toolName": "metrics", "riskLevel": "READ", "idempotencyKey": "idem-7" });
    let first = propose(&app, &incident_id, body.clone()).await;
    let second = propose(&app, &incident_id, body).await;
    assert_eq!(first["id"], second["id"]);

    let (_, actions) = call(&app, api("GET", &format!("/api/v1/incidents/{incident_id}/actions"), None)).await;
    assert_eq!(actions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let (status, body) = call(
        &app,
        api(
            "GET",
            &format!("/api/v1/incidents/{incident_id}/actions/{}", uuid::Uuid::new_v4()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ACTION_NOT_FOUND");
}

// ── Correlation graph ──

#[tokio::test]
async fn root_cause_path_scores_weight_over_length() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let nodes_uri = format!("/api/v1/incidents/{incident_id}/graph/nodes");

    let (status, deploy) = call(
        &app,
        api("POST", &nodes_uri, Some(json!({ "nodeType": "DEPLOY", "label": "Deploy v2.3" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{deploy}");
    let (_, alert) = call(
        &app,
        api("POST", &nodes_uri, Some(json!({ "nodeType": "ALERT", "label": "High Error Rate" }))),
    )
    .await;

    let (status, _) = call(
        &app,
        api(
            "POST",
            &format!("/api/v1/incidents/{incident_id}/graph/edges"),
            Some(json!({
                "sourceNodeId": deploy["id"],
                "targetNodeId": alert["id"],
                "edgeType": "CAUSAL_HINT",
                "weight": 0.9
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, paths) = call(
        &app,
        api(
            "GET",
            &format!("/api/v1/incidents/{incident_id}/graph/root-cause-paths?maxPaths=3"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let paths = paths.as_array().unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0]["nodeLabels"], json!(["Deploy v2.3", "High Error Rate"]));
    assert!((paths[0]["score"].as_f64().unwrap() - 0.75).abs() < 1e-9);

    let deploy_id = deploy["id"].as_str().unwrap();
    let (status, radius) = call(
        &app,
        api(
            "GET",
            &format!("/api/v1/incidents/{incident_id}/graph/blast-radius/{deploy_id}"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(radius["totalAffected"], 1);
}

#[tokio::test]
async fn edge_to_unknown_node_is_not_found() {
    let store = MemoryStore::new();
    let app = app(&store);
    let incident_id = create_incident(&app, "inc-1").await;
    let (status, body) = call(
        &app,
        api(
            "POST",
            &format!("/api/v1/incidents/{incident_id}/graph/edges"),
            Some(json!({
                "sourceNodeId": uuid::Uuid::new_v4(),
                "targetNodeId": uuid::Uuid::new_v4(),
                "edgeType": "DEPENDS_ON"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NODE_NOT_FOUND");
}

// ── Tools ──

#[tokio::test]
async fn unknown_tool_run_is_not_found() {
    let store = MemoryStore::new();
    let (status, body) = call(&app(&store), api("POST", "/api/v1/tools/ghost/run", Some(json!({})))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "TOOL_NOT_FOUND");
}

#[tokio::test]
async fn builtin_tools_are_listed() {
    let store = MemoryStore::new();
    let (status, body) = call(&app(&store), api("GET", "/api/v1/tools", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tools"], json!(["deploy", "logs", "metrics", "topology"]));
}

/// Blocks inside the tool call until released.
#[derive(Default)]
struct Gate {
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

struct Held(Arc<Gate>);

#[async_trait]
impl Tool for Held {
    fn name(&self) -> &str {
        "held"
    }

    async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<ToolResponse> {
        self.0.entered.notify_one();
        self.0.release.notified().await;
        Ok(ToolResponse::success("done", BTreeMap::new()))
    }
}

#[tokio::test]
async fn slow_tool_run_does_not_block_other_requests() {
    let store = MemoryStore::new();
    let gate = Arc::new(Gate::default());
    let mut state = AppState::new(MocConfig::default(), Arc::new(store.clone()), None);
    state.executor = Arc::new(ToolExecutor::new(
        ToolRegistry::with_builtin_tools().register(Held(gate.clone())),
        Box::new(Unlimited),
        ToolConfig::default(),
    ));
    let app = build_app(state);

    let running = tokio::spawn({
        let app = app.clone();
        async move { call(&app, api("POST", "/api/v1/tools/held/run", Some(json!({})))).await }
    });
    gate.entered.notified().await;

    let other_tenant = Request::builder()
        .uri("/api/v1/incidents")
        .header("x-api-key", API_KEY)
        .header("x-customer-id", "globex")
        .body(Body::empty())
        .unwrap();
    let (status, body) = tokio::time::timeout(Duration::from_secs(2), call(&app, other_tenant))
        .await
        .expect("other tenant waited on the tool");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = tokio::time::timeout(Duration::from_secs(2), call(&app, api("GET", "/api/v1/incidents", None)))
        .await
        .expect("same tenant waited on the tool");
    assert_eq!(status, StatusCode::OK);

    gate.release.notify_one();
    let (status, body) = running.await.unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["content"], "done");
}

// ── Webhooks ──

#[tokio::test]
async fn pagerduty_webhook_dedups_and_attaches() {
    let store = MemoryStore::new();
    let app = app(&store);

    let (status, first) = call(&app, webhook(&json!({ "messages": [pd_message("PINC1", "key-1")] }), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{first}");
    assert_eq!(first["status"], "accepted");
    assert_eq!(first["processed"], 1);
    let first = &first["results"][0];
    assert_eq!(first["newIncident"], true);
    assert_eq!(first["deduplicated"], false);

    let (_, second) = call(&app, webhook(&json!({ "messages": [pd_message("PINC1", "key-1")] }), None)).await;
    let second = &second["results"][0];
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["newIncident"], false);
    assert_eq!(second["alertId"], first["alertId"]);

    let (_, third) = call(&app, webhook(&json!({ "messages": [pd_message("PINC1", "key-2")] }), None)).await;
    let third = &third["results"][0];
    assert_eq!(third["deduplicated"], false);
    assert_eq!(third["newIncident"], false);
    assert_eq!(third["incidentId"], first["incidentId"]);

    let mut uow = store.begin(Scope::System).await.unwrap();
    let received = uow
        .list_unpublished(100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "ALERT_RECEIVED")
        .count();
    assert_eq!(received, 2);
}

#[tokio::test]
async fn pagerduty_webhook_skips_a_bad_message_and_keeps_the_rest() {
    let store = MemoryStore::new();
    let app = app(&store);
    let malformed = json!({ "event": "incident.trigger", "incident": { "id": "PBAD" } });
    let payload = json!({ "messages": [pd_message("PINC1", "key-1"), malformed, pd_message("PINC2", "key-2")] });

    let (status, body) = call(&app, webhook(&payload, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["processed"], 2);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["results"][0]["newIncident"], true);
    assert_eq!(body["results"][1]["newIncident"], true);

    let (_, incidents) = call(&app, api("GET", "/api/v1/incidents", None)).await;
    assert_eq!(incidents.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn pagerduty_webhook_rejects_empty_payload() {
    let store = MemoryStore::new();
    let (status, body) = call(&app(&store), webhook(&json!({ "messages": [] }), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_PAYLOAD");
    assert_eq!(body["message"], "No messages in payload");
}

#[tokio::test]
async fn pagerduty_webhook_checks_signature_when_configured() {
    let store = MemoryStore::new();
    let config = MocConfig {
        pagerduty_webhook_secret: "s3cret".into(),
        ..MocConfig::default()
    };
    let app = app_with(&store, config);
    let body = json!({ "messages": [pd_message("PINC9", "key-9")] });

    let (status, _) = call(&app, webhook(&body, Some("v1=deadbeef"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
    mac.update(body.to_string().as_bytes());
    let signature = format!("v1={}", hex::encode(mac.finalize().into_bytes()));
    let (status, _) = call(&app, webhook(&body, Some(&signature))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

// ── Outbox ──

#[tokio::test]
async fn relay_publishes_committed_events_once() {
    let store = MemoryStore::new();
    let app = app(&store);
    create_incident(&app, "inc-1").await;

    let publisher = Arc::new(MemoryPublisher::new());
    let relay = OutboxRelay::new(Arc::new(store.clone()), publisher.clone(), 100);
    assert_eq!(relay.relay_once().await.unwrap(), 1);
    assert_eq!(relay.relay_once().await.unwrap(), 0);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "moc.incident.incident_created");
}
