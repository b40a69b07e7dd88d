//! Metric query stub.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Tool, ToolRequest, ToolResponse};

pub struct MetricsTool;

#[async_trait]
impl Tool for MetricsTool {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<ToolResponse> {
        let service = request.param("service", "unknown");
        let metric = request.param("metric", "latency_p99");
        let time_range = request.param("timeRange", "1h");

        let content = format!(
            "[metrics] {metric} for service={service} over {time_range}\n\
             p50: 45ms\n\
             p90: 120ms\n\
             p99: 890ms\n\
             error_rate: 4.2%\n\
             throughput: 1,250 req/s"
        );

        let metadata = BTreeMap::from([
            ("service".to_string(), service.to_string()),
            ("metric".to_string(), metric.to_string()),
            ("timeRange".to_string(), time_range.to_string()),
        ]);
        Ok(ToolResponse::success(content, metadata))
    }
}
