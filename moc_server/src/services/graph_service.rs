//! Correlation graph: node/edge mutations, alert auto-seeding, root-cause
//! search and blast radius.
//!
//! Both traversals run over an in-memory snapshot of the incident's nodes and
//! edges read inside the caller's unit of work.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CorrelationEdge, CorrelationNode, EdgeType, IncidentEvent, NodeType};
use crate::services::incident_service;
use crate::store::UnitOfWork;
use crate::validation::{Validate, Violations};

pub const DEFAULT_MAX_PATHS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNodeRequest {
    pub node_type: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub reference_id: Option<Uuid>,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Validate for AddNodeRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut violations = Violations::new()
            .not_blank("nodeType", self.node_type.as_deref())
            .not_blank("label", self.label.as_deref());
        if let Some(raw) = self.node_type.as_deref().filter(|s| !s.trim().is_empty()) {
            violations = violations.one_of::<NodeType>("nodeType", raw);
        }
        violations.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEdgeRequest {
    pub source_node_id: Option<Uuid>,
    pub target_node_id: Option<Uuid>,
    pub edge_type: Option<String>,
    pub weight: Option<f64>,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Validate for AddEdgeRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut violations = Violations::new()
            .not_null("sourceNodeId", self.source_node_id.as_ref())
            .not_null("targetNodeId", self.target_node_id.as_ref())
            .not_blank("edgeType", self.edge_type.as_deref())
            .positive_fraction("weight", self.weight);
        if let Some(raw) = self.edge_type.as_deref().filter(|s| !s.trim().is_empty()) {
            violations = violations.one_of::<EdgeType>("edgeType", raw);
        }
        violations.finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationGraph {
    pub nodes: Vec<CorrelationNode>,
    pub edges: Vec<CorrelationEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCausePath {
    pub node_ids: Vec<Uuid>,
    pub node_labels: Vec<String>,
    pub score: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlastRadius {
    pub root_cause_node: CorrelationNode,
    pub affected_nodes: Vec<CorrelationNode>,
    pub total_affected: usize,
}

/// Seed missing alert nodes, then return the whole graph.
pub async fn get_graph(uow: &mut dyn UnitOfWork, incident_id: Uuid) -> AppResult<CorrelationGraph> {
    let incident = incident_service::find(uow, incident_id).await?;

    let seeded = seed_alert_nodes(uow, &incident.tenant_id, incident_id).await?;
    if seeded > 0 {
        tracing::info!(incident_id = %incident_id, seeded, "Auto-seeded alert nodes");
    }

    Ok(CorrelationGraph {
        nodes: uow.list_nodes(incident_id).await?,
        edges: uow.list_edges(incident_id).await?,
    })
}

async fn seed_alert_nodes(uow: &mut dyn UnitOfWork, tenant_id: &str, incident_id: Uuid) -> AppResult<usize> {
    let alerts = uow.list_alerts_by_incident(incident_id).await?;
    let referenced: HashSet<Uuid> = uow
        .list_nodes(incident_id)
        .await?
        .into_iter()
        .filter_map(|n| n.reference_id)
        .collect();

    let mut seeded = 0;
    for alert in alerts.iter().filter(|a| !referenced.contains(&a.id)) {
        let mut node = CorrelationNode::new(tenant_id, incident_id, NodeType::Alert, &alert.title);
        node.description = alert.description.clone();
        node.reference_id = Some(alert.id);
        node.source = Some(alert.source.clone());
        uow.insert_node(&node).await?;
        seeded += 1;
    }

    if seeded > 0 {
        uow.insert_event(&IncidentEvent::graph_seeded(tenant_id, incident_id, seeded))
            .await?;
    }
    Ok(seeded)
}

pub async fn add_node(uow: &mut dyn UnitOfWork, incident_id: Uuid, request: AddNodeRequest) -> AppResult<CorrelationNode> {
    request.validate()?;
    let incident = incident_service::find(uow, incident_id).await?;
    let node_type: NodeType = request
        .node_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: crate::models::UnknownVariant| AppError::BadRequest(e.to_string()))?;

    let mut node = CorrelationNode::new(
        &incident.tenant_id,
        incident_id,
        node_type,
        request.label.unwrap_or_default(),
    );
    node.description = request.description;
    node.reference_id = request.reference_id;
    node.source = request.source;
    node.metadata = serde_json::to_value(&request.metadata)?;
    uow.insert_node(&node).await?;

    uow.insert_event(&IncidentEvent::graph_node_added(
        &incident.tenant_id,
        incident_id,
        &node.label,
        node_type.as_str(),
    ))
    .await?;

    tracing::info!(incident_id = %incident_id, node_id = %node.id, node_type = %node_type, label = %node.label, "Graph node added");
    Ok(node)
}

/// Fetch a node, failing with `NODE_NOT_FOUND` unless it belongs to `incident_id`.
async fn incident_node(uow: &mut dyn UnitOfWork, incident_id: Uuid, node_id: Uuid) -> AppResult<CorrelationNode> {
    uow.find_node(node_id)
        .await?
        .filter(|n| n.incident_id == incident_id)
        .ok_or(AppError::NodeNotFound(node_id))
}

pub async fn add_edge(uow: &mut dyn UnitOfWork, incident_id: Uuid, request: AddEdgeRequest) -> AppResult<CorrelationEdge> {
    request.validate()?;
    let incident = incident_service::find(uow, incident_id).await?;
    let edge_type: EdgeType = request
        .edge_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: crate::models::UnknownVariant| AppError::BadRequest(e.to_string()))?;

    let source = incident_node(uow, incident_id, request.source_node_id.unwrap_or_default()).await?;
    let target = incident_node(uow, incident_id, request.target_node_id.unwrap_or_default()).await?;

    let mut edge = CorrelationEdge::new(
        &incident.tenant_id,
        incident_id,
        source.id,
        target.id,
        edge_type,
        request.weight.unwrap_or(1.0),
    );
    edge.reason = request.reason;
    edge.metadata = serde_json::to_value(&request.metadata)?;
    uow.insert_edge(&edge).await?;

    tracing::info!(
        incident_id = %incident_id,
        "Graph edge added: {} → {} ({})",
        source.label,
        target.label,
        edge_type
    );
    Ok(edge)
}

pub async fn find_root_cause_paths(
    uow: &mut dyn UnitOfWork,
    incident_id: Uuid,
    max_paths: usize,
) -> AppResult<Vec<RootCausePath>> {
    incident_service::find(uow, incident_id).await?;
    let nodes = uow.list_nodes(incident_id).await?;
    let edges = uow.list_edges(incident_id).await?;
    Ok(root_cause_paths(&nodes, &edges, max_paths))
}

pub async fn compute_blast_radius(
    uow: &mut dyn UnitOfWork,
    incident_id: Uuid,
    root_node_id: Uuid,
) -> AppResult<BlastRadius> {
    incident_service::find(uow, incident_id).await?;
    let root = incident_node(uow, incident_id, root_node_id).await?;
    let nodes = uow.list_nodes(incident_id).await?;
    let edges = uow.list_edges(incident_id).await?;

    let affected = blast_radius(root.id, &nodes, &edges);
    Ok(BlastRadius {
        root_cause_node: root,
        total_affected: affected.len(),
        affected_nodes: affected,
    })
}

struct Search<'a> {
    nodes: HashMap<Uuid, &'a CorrelationNode>,
    incoming: HashMap<Uuid, Vec<&'a CorrelationEdge>>,
    path: Vec<Uuid>,
    weights: Vec<f64>,
    visited: HashSet<Uuid>,
    found: Vec<(Vec<Uuid>, Vec<f64>)>,
}

impl Search<'_> {
    fn backward(&mut self, current: Uuid) {
        self.visited.insert(current);

        let incoming = self.incoming.get(&current).cloned().unwrap_or_default();
        for edge in incoming {
            let source_id = edge.source_node_id;
            if self.visited.contains(&source_id) {
                continue;
            }
            let Some(source) = self.nodes.get(&source_id) else {
                continue;
            };

            self.path.push(source_id);
            self.weights.push(edge.weight);

            if source.node_type.is_root_cause() && self.path.len() > 1 {
                self.found.push((self.path.clone(), self.weights.clone()));
            }
            self.backward(source_id);

            self.path.pop();
            self.weights.pop();
        }

        self.visited.remove(&current);
    }
}

/// Backward DFS from every symptom node to root-cause typed nodes, best
/// `max_paths` first. Equal scores keep discovery order.
pub fn root_cause_paths(nodes: &[CorrelationNode], edges: &[CorrelationEdge], max_paths: usize) -> Vec<RootCausePath> {
    if nodes.is_empty() || edges.is_empty() {
        return Vec::new();
    }

    let mut incoming: HashMap<Uuid, Vec<&CorrelationEdge>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.edge_type.is_traversable()) {
        incoming.entry(edge.target_node_id).or_default().push(edge);
    }
    let mut search = Search {
        nodes: nodes.iter().map(|n| (n.id, n)).collect(),
        incoming,
        path: Vec::new(),
        weights: Vec::new(),
        visited: HashSet::new(),
        found: Vec::new(),
    };

    let mut paths = Vec::new();
    for symptom in nodes.iter().filter(|n| n.node_type.is_symptom()) {
        search.path = vec![symptom.id];
        search.weights.clear();
        search.visited.clear();
        search.found.clear();
        search.backward(symptom.id);

        for (ids, weights) in std::mem::take(&mut search.found) {
            let product: f64 = weights.iter().product();
            let score = product / (1.0 + ids.len() as f64 * 0.1);

            let label = |id: &Uuid| search.nodes.get(id).map(|n| n.label.clone()).unwrap_or_default();
            let start = ids.first().map(label).unwrap_or_default();
            let end = ids.last().map(label).unwrap_or_default();

            let node_ids: Vec<Uuid> = ids.iter().rev().copied().collect();
            let node_labels = node_ids.iter().map(label).collect();
            paths.push(RootCausePath {
                node_ids,
                node_labels,
                score,
                explanation: format!("{end} → ... → {start} (score: {score:.3})"),
            });
        }
    }

    paths.sort_by(|a, b| b.score.total_cmp(&a.score));
    paths.truncate(max_paths);
    paths
}

/// Nodes reachable forward from `root` along traversable edges, root excluded,
/// each at most once, in BFS order.
pub fn blast_radius(root: Uuid, nodes: &[CorrelationNode], edges: &[CorrelationEdge]) -> Vec<CorrelationNode> {
    let by_id: HashMap<Uuid, &CorrelationNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut outgoing: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.edge_type.is_traversable()) {
        outgoing.entry(edge.source_node_id).or_default().push(edge.target_node_id);
    }

    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut affected = Vec::new();
    while let Some(current) = queue.pop_front() {
        for target in outgoing.get(&current).into_iter().flatten() {
            if visited.insert(*target) {
                queue.push_back(*target);
                if let Some(node) = by_id.get(target) {
                    affected.push((*node).clone());
                }
            }
        }
    }
    affected
}
