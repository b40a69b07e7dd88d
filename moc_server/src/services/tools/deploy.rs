//! Deployment history stub.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Tool, ToolRequest, ToolResponse};

pub struct DeployTool;

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> &str {
        "deploy"
    }

    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<ToolResponse> {
        let service = request.param("service", "unknown");
        let environment = request.param("environment", "production");

        let content = format!(
            "[deploy] Recent deployments for service={service}, env={environment}\n\
             #142  2024-01-15T09:15:00Z  v2.3.1 → v2.4.0  deployer=ci-bot  status=SUCCESS\n\
             #141  2024-01-14T14:30:00Z  v2.3.0 → v2.3.1  deployer=alice   status=SUCCESS\n\
             #140  2024-01-13T11:00:00Z  v2.2.9 → v2.3.0  deployer=ci-bot  status=ROLLED_BACK"
        );

        let metadata = BTreeMap::from([
            ("service".to_string(), service.to_string()),
            ("environment".to_string(), environment.to_string()),
            ("deployCount".to_string(), "3".to_string()),
        ]);
        Ok(ToolResponse::success(content, metadata))
    }
}
