//! REST handlers under `/api/v1`.
//!
//! Each handler opens one unit of work for the request's tenant and commits it
//! only when the service returns `Ok`; an error drops the unit and rolls back.
//! Ad-hoc tool runs split around the tool call.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiJson, AppState};
use crate::error::{AppError, AppResult};
use crate::models::{
    Alert, AlertStatus, CorrelationEdge, CorrelationNode, Evidence, Hypothesis, Incident, IncidentEvent,
    IncidentStatus,
};
use crate::services::action_service::{
    self, ActionView, ApproveActionRequest, ProposeActionRequest, RejectActionRequest,
};
use crate::services::alert_service::{self, IngestAlertRequest};
use crate::services::graph_service::{
    self, AddEdgeRequest, AddNodeRequest, BlastRadius, CorrelationGraph, RootCausePath, DEFAULT_MAX_PATHS,
};
use crate::services::incident_service::{
    self, AddEvidenceRequest, AddHypothesisRequest, CreateIncidentRequest,
};
use crate::services::tool_executor::{ExecuteToolCommand, ToolExecutionResult};
use crate::services::tools::ToolParameters;
use crate::services::triage_service::TriageResult;
use crate::tenant;

type Created<T> = (StatusCode, Json<T>);

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

impl StatusQuery {
    fn parse<T: FromStr<Err = crate::models::UnknownVariant>>(&self) -> AppResult<Option<T>> {
        match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: crate::models::UnknownVariant| AppError::BadRequest(e.to_string())),
            None => Ok(None),
        }
    }
}

// ── Alerts ──

pub async fn ingest_alert(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<IngestAlertRequest>,
) -> AppResult<Created<Alert>> {
    let mut uow = state.unit_of_work().await?;
    let alert = alert_service::ingest(uow.as_mut(), req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn get_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Alert>> {
    let mut uow = state.unit_of_work().await?;
    alert_service::find(uow.as_mut(), id).await.map(Json)
}

/// `status` defaults to `OPEN`.
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<Vec<Alert>>> {
    let status = query.parse::<AlertStatus>()?.unwrap_or(AlertStatus::Open);
    let mut uow = state.unit_of_work().await?;
    alert_service::list_by_status(uow.as_mut(), status).await.map(Json)
}

pub async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Alert>> {
    let mut uow = state.unit_of_work().await?;
    let alert = alert_service::acknowledge(uow.as_mut(), id).await?;
    uow.commit().await?;
    Ok(Json(alert))
}

pub async fn resolve_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Alert>> {
    let mut uow = state.unit_of_work().await?;
    let alert = alert_service::resolve(uow.as_mut(), id).await?;
    uow.commit().await?;
    Ok(Json(alert))
}

// ── Incidents ──

pub async fn create_incident(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateIncidentRequest>,
) -> AppResult<Created<Incident>> {
    let mut uow = state.unit_of_work().await?;
    let incident = incident_service::create(uow.as_mut(), req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(incident)))
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<Vec<Incident>>> {
    let status = query.parse::<IncidentStatus>()?;
    let mut uow = state.unit_of_work().await?;
    incident_service::list(uow.as_mut(), status).await.map(Json)
}

pub async fn get_incident(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Incident>> {
    let mut uow = state.unit_of_work().await?;
    incident_service::find(uow.as_mut(), id).await.map(Json)
}

pub async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<IncidentEvent>>> {
    let mut uow = state.unit_of_work().await?;
    incident_service::timeline(uow.as_mut(), id).await.map(Json)
}

pub async fn transition_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<Incident>> {
    let target = query
        .parse::<IncidentStatus>()?
        .ok_or_else(|| AppError::BadRequest("Query parameter 'status' is required".to_string()))?;
    let mut uow = state.unit_of_work().await?;
    let incident = incident_service::transition(uow.as_mut(), id, target).await?;
    uow.commit().await?;
    Ok(Json(incident))
}

pub async fn add_hypothesis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AddHypothesisRequest>,
) -> AppResult<Created<Hypothesis>> {
    let mut uow = state.unit_of_work().await?;
    let hypothesis = incident_service::add_hypothesis(uow.as_mut(), id, req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(hypothesis)))
}

pub async fn list_hypotheses(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Hypothesis>>> {
    let mut uow = state.unit_of_work().await?;
    incident_service::hypotheses(uow.as_mut(), id).await.map(Json)
}

pub async fn add_evidence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AddEvidenceRequest>,
) -> AppResult<Created<Evidence>> {
    let mut uow = state.unit_of_work().await?;
    let evidence = incident_service::add_evidence(uow.as_mut(), id, req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

pub async fn list_evidence(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Vec<Evidence>>> {
    let mut uow = state.unit_of_work().await?;
    incident_service::evidence(uow.as_mut(), id).await.map(Json)
}

pub async fn triage_incident(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<TriageResult>> {
    let mut uow = state.unit_of_work().await?;
    let result = state.triage.triage(uow.as_mut(), id).await?;
    uow.commit().await?;
    Ok(Json(result))
}

// ── Actions ──

/// Always 201, including proposals the policy rejected.
pub async fn propose_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<ProposeActionRequest>,
) -> AppResult<Created<ActionView>> {
    let mut uow = state.unit_of_work().await?;
    let action = state.actions.propose(uow.as_mut(), id, req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(action.into())))
}

pub async fn list_actions(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Vec<ActionView>>> {
    let mut uow = state.unit_of_work().await?;
    let actions = action_service::list(uow.as_mut(), id).await?;
    Ok(Json(actions.into_iter().map(ActionView::from).collect()))
}

pub async fn get_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ActionView>> {
    let mut uow = state.unit_of_work().await?;
    let action = action_service::find(uow.as_mut(), id, action_id).await?;
    Ok(Json(action.into()))
}

pub async fn approve_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
    ApiJson(req): ApiJson<ApproveActionRequest>,
) -> AppResult<Json<ActionView>> {
    let mut uow = state.unit_of_work().await?;
    let action = state.actions.approve(uow.as_mut(), id, action_id, req).await?;
    uow.commit().await?;
    Ok(Json(action.into()))
}

pub async fn reject_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
    ApiJson(req): ApiJson<RejectActionRequest>,
) -> AppResult<Json<ActionView>> {
    let mut uow = state.unit_of_work().await?;
    let action = state.actions.reject(uow.as_mut(), id, action_id, req).await?;
    uow.commit().await?;
    Ok(Json(action.into()))
}

/// A failed tool run still answers 200 with the action in `FAILED`.
pub async fn execute_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ActionView>> {
    let mut uow = state.unit_of_work().await?;
    let action = state.actions.execute(uow.as_mut(), id, action_id).await?;
    uow.commit().await?;
    Ok(Json(action.into()))
}

// ── Correlation graph ──

pub async fn get_graph(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<CorrelationGraph>> {
    let mut uow = state.unit_of_work().await?;
    let graph = graph_service::get_graph(uow.as_mut(), id).await?;
    uow.commit().await?;
    Ok(Json(graph))
}

pub async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AddNodeRequest>,
) -> AppResult<Created<CorrelationNode>> {
    let mut uow = state.unit_of_work().await?;
    let node = graph_service::add_node(uow.as_mut(), id, req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn add_edge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AddEdgeRequest>,
) -> AppResult<Created<CorrelationEdge>> {
    let mut uow = state.unit_of_work().await?;
    let edge = graph_service::add_edge(uow.as_mut(), id, req).await?;
    uow.commit().await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCauseQuery {
    pub max_paths: Option<usize>,
}

pub async fn root_cause_paths(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RootCauseQuery>,
) -> AppResult<Json<Vec<RootCausePath>>> {
    let max_paths = query.max_paths.unwrap_or(DEFAULT_MAX_PATHS);
    let mut uow = state.unit_of_work().await?;
    graph_service::find_root_cause_paths(uow.as_mut(), id, max_paths)
        .await
        .map(Json)
}

pub async fn blast_radius(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<BlastRadius>> {
    let mut uow = state.unit_of_work().await?;
    graph_service::compute_blast_radius(uow.as_mut(), id, node_id)
        .await
        .map(Json)
}

// ── Tools ──

#[derive(Debug, Serialize)]
pub struct ToolList {
    pub tools: Vec<String>,
}

pub async fn list_tools(State(state): State<AppState>) -> Json<ToolList> {
    Json(ToolList {
        tools: state.executor.registry().names(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunToolRequest {
    pub incident_id: Option<Uuid>,
    #[serde(default)]
    pub parameters: ToolParameters,
    pub requested_by: Option<String>,
}

/// The tool runs between two units of work, so a slow tool holds no store
/// lock or transaction.
pub async fn run_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(req): ApiJson<RunToolRequest>,
) -> AppResult<Json<ToolExecutionResult>> {
    if let Some(incident_id) = req.incident_id {
        let mut uow = state.unit_of_work().await?;
        incident_service::find(uow.as_mut(), incident_id).await?;
    }

    let command = ExecuteToolCommand {
        incident_id: req.incident_id,
        tool_name: name,
        parameters: req.parameters,
        requested_by: req
            .requested_by
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| crate::models::SYSTEM_PRINCIPAL.to_string()),
    };
    let tenant = tenant::require()?;
    let outcome = state.executor.invoke(&tenant, &command).await?;

    let mut uow = state.unit_of_work().await?;
    let result = state.executor.record(uow.as_mut(), &command, outcome).await?;
    uow.commit().await?;
    Ok(Json(result))
}
