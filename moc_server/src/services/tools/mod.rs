//! Diagnostic and remediation tools plus the name-keyed registry.

pub mod deploy;
pub mod logs;
pub mod metrics;
pub mod topology;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Flat string parameters handed to a tool.
pub type ToolParameters = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub incident_id: Option<Uuid>,
    pub tool_name: String,
    pub parameters: ToolParameters,
    pub requested_by: String,
}

impl ToolRequest {
    pub fn param<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameters.get(key).map(String::as_str).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub success: bool,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub executed_at: DateTime<Utc>,
}

impl ToolResponse {
    pub fn success(content: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error_message: None,
            metadata,
            executed_at: Utc::now(),
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error_message: Some(error_message.into()),
            metadata: BTreeMap::new(),
            executed_at: Utc::now(),
        }
    }
}

/// An executable tool. `Err` means the call broke and may be retried;
/// `Ok` with `success == false` is a definitive tool-level failure.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<ToolResponse>;
}

/// Convert stored JSON parameters to the flat form tools take.
/// Non-string scalars keep their JSON rendering; `null` is dropped.
pub fn parameters_from_json(value: &serde_json::Value) -> ToolParameters {
    let Some(map) = value.as_object() else {
        return ToolParameters::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

/// Tools keyed by name. Immutable after startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in diagnostic tools.
    pub fn with_builtin_tools() -> Self {
        Self::new()
            .register(logs::LogsTool)
            .register(metrics::MetricsTool)
            .register(deploy::DeployTool)
            .register(topology::TopologyTool)
    }

    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, Arc::new(tool));
        self
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Tool>, AppError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::ToolNotFound(name.to_string()))
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
