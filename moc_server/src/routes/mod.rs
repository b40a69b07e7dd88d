//! Control-plane HTTP routes: REST API, PagerDuty webhook, health and metrics.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;

use crate::config::MocConfig;
use crate::error::{AppError, AppResult};
use crate::policy::ActionPolicyEvaluator;
use crate::services::action_service::ActionService;
use crate::services::llm::{self, LlmClient};
use crate::services::tool_executor::ToolExecutor;
use crate::services::tools::ToolRegistry;
use crate::services::triage_service::TriageService;
use crate::store::{Scope, Store, UnitOfWork};
use crate::tenant::{self, TenantId};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TENANT_HEADER: &str = "x-customer-id";

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<MocConfig>,
    pub executor: Arc<ToolExecutor>,
    pub actions: Arc<ActionService>,
    pub triage: Arc<TriageService>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the services described by `config` over `store`.
    pub fn new(config: MocConfig, store: Arc<dyn Store>, metrics: Option<PrometheusHandle>) -> Self {
        let executor = Arc::new(ToolExecutor::from_config(
            ToolRegistry::with_builtin_tools(),
            config.tools.clone(),
        ));
        let llm: Arc<dyn LlmClient> = Arc::from(llm::from_config(&config.llm));
        let triage = Arc::new(TriageService::new(llm, config.llm.token_budget));
        let actions = Arc::new(ActionService::new(
            ActionPolicyEvaluator::new(config.action_policy.clone()),
            executor.clone(),
        ));

        Self {
            store,
            config: Arc::new(config),
            executor,
            actions,
            triage,
            metrics,
        }
    }

    /// Unit of work for the request's tenant.
    pub async fn unit_of_work(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tenant = tenant::require()?;
        Ok(self.store.begin(Scope::Tenant(tenant)).await?)
    }
}

/// Build the control plane's Axum router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Alerts
        .route("/alerts", post(api::ingest_alert).get(api::list_alerts))
        .route("/alerts/{id}", get(api::get_alert))
        .route("/alerts/{id}/acknowledge", post(api::acknowledge_alert))
        .route("/alerts/{id}/resolve", post(api::resolve_alert))
        // Incidents
        .route("/incidents", post(api::create_incident).get(api::list_incidents))
        .route("/incidents/{id}", get(api::get_incident))
        .route("/incidents/{id}/timeline", get(api::get_timeline))
        .route("/incidents/{id}/transition", post(api::transition_incident))
        .route(
            "/incidents/{id}/hypotheses",
            post(api::add_hypothesis).get(api::list_hypotheses),
        )
        .route(
            "/incidents/{id}/evidence",
            post(api::add_evidence).get(api::list_evidence),
        )
        .route("/incidents/{id}/triage", post(api::triage_incident))
        // Actions
        .route("/incidents/{id}/actions", get(api::list_actions))
        .route("/incidents/{id}/actions/propose", post(api::propose_action))
        .route("/incidents/{id}/actions/{action_id}", get(api::get_action))
        .route("/incidents/{id}/actions/{action_id}/approve", post(api::approve_action))
        .route("/incidents/{id}/actions/{action_id}/reject", post(api::reject_action))
        .route("/incidents/{id}/actions/{action_id}/execute", post(api::execute_action))
        // Correlation graph
        .route("/incidents/{id}/graph", get(api::get_graph))
        .route("/incidents/{id}/graph/nodes", post(api::add_node))
        .route("/incidents/{id}/graph/edges", post(api::add_edge))
        .route("/incidents/{id}/graph/root-cause-paths", get(api::root_cause_paths))
        .route("/incidents/{id}/graph/blast-radius/{node_id}", get(api::blast_radius))
        // Tools
        .route("/tools", get(api::list_tools))
        .route("/tools/{name}/run", post(api::run_tool))
        .layer(middleware::from_fn(tenant_context))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .nest("/api/v1", api)
        .route("/webhooks/{tenant_id}/pagerduty", post(webhook::pagerduty))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

// ── Middleware ──

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    let key = header(req.headers(), API_KEY_HEADER);
    if !key.is_some_and(|k| state.config.api_keys.contains(k)) {
        tracing::warn!(path = %req.uri().path(), "Rejected request with missing or invalid API key");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(req).await)
}

/// Bind `X-Customer-Id` as the tenant for everything the request does.
async fn tenant_context(req: Request, next: Next) -> Result<Response, AppError> {
    let tenant = header(req.headers(), TENANT_HEADER)
        .and_then(TenantId::parse)
        .ok_or(AppError::MissingTenant)?;
    Ok(tenant::scope(tenant, next.run(req)).await)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ── Extractors ──

/// JSON body whose parse failures render in the API error shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

// ── Introspection ──

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "store": state.store.kind() }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => String::new().into_response(),
    }
}
