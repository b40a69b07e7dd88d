//! Log search stub.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Tool, ToolRequest, ToolResponse};

pub struct LogsTool;

#[async_trait]
impl Tool for LogsTool {
    fn name(&self) -> &str {
        "logs"
    }

    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<ToolResponse> {
        let service = request.param("service", "unknown");
        let time_range = request.param("timeRange", "1h");
        let query = request.param("query", "*");

        let content = format!(
            "[logs] Results for service={service}, timeRange={time_range}, query={query}\n\
             2024-01-15T10:30:00Z ERROR Connection pool exhausted (db-pool-1)\n\
             2024-01-15T10:30:05Z WARN  Retry attempt 3/3 failed for downstream call\n\
             2024-01-15T10:30:10Z ERROR Request timeout after 30s on /api/v1/orders"
        );

        let metadata = BTreeMap::from([
            ("service".to_string(), service.to_string()),
            ("timeRange".to_string(), time_range.to_string()),
            ("resultCount".to_string(), "3".to_string()),
        ]);
        Ok(ToolResponse::success(content, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_fill_missing_parameters() {
        let request = ToolRequest {
            incident_id: None,
            tool_name: "logs".into(),
            parameters: BTreeMap::from([("service".into(), "checkout".into())]),
            requested_by: "alice".into(),
        };
        let response = LogsTool.execute(&request).await.unwrap();
        assert!(response.success);
        let content = response.content.unwrap();
        assert!(content.starts_with("[logs] Results for service=checkout, timeRange=1h, query=*"));
        assert_eq!(response.metadata["resultCount"], "3");
    }
}
