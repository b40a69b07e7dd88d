//! ToolExecutionLog: one row per tool invocation, including rate-limited ones.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::tool_execution_logs;

string_enum! {
    pub enum ToolExecutionStatus {
        Success => "SUCCESS",
        Failure => "FAILURE",
        Timeout => "TIMEOUT",
        RateLimited => "RATE_LIMITED",
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = tool_execution_logs)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionLog {
    pub id: Uuid,
    pub tenant_id: String,
    pub tool_name: String,
    pub incident_id: Option<Uuid>,
    pub status: ToolExecutionStatus,
    pub request_payload: serde_json::Value,
    pub response_content: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub retry_count: i32,
    pub requested_by: String,
    pub executed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub created_by: String,
}
