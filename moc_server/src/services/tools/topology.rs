//! Service dependency map stub.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Tool, ToolRequest, ToolResponse};

pub struct TopologyTool;

#[async_trait]
impl Tool for TopologyTool {
    fn name(&self) -> &str {
        "topology"
    }

    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<ToolResponse> {
        let service = request.param("service", "unknown");

        let content = format!(
            "[topology] Service dependency map for {service}\n\
             Upstream:\n  \
               - api-gateway → {service} (HTTP, p99=45ms)\n  \
               - event-processor → {service} (Kafka, topic=orders)\n\
             Downstream:\n  \
               - {service} → postgres-primary (JDBC, pool=10)\n  \
               - {service} → redis-cache (TCP, ttl=300s)\n  \
               - {service} → payment-service (gRPC, p99=120ms)"
        );

        let metadata = BTreeMap::from([
            ("service".to_string(), service.to_string()),
            ("upstreamCount".to_string(), "2".to_string()),
            ("downstreamCount".to_string(), "3".to_string()),
        ]);
        Ok(ToolResponse::success(content, metadata))
    }
}
