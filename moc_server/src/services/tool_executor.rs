//! Guardrailed tool execution.
//!
//! One call runs: rate limit, registry lookup, the tool under retry (inner)
//! and a deadline (outer), then persists the execution log, the evidence for
//! successful incident-bound runs, and a `TOOL_EXECUTED` outbox event. All
//! writes go through the caller's unit of work.
//!
//! [`ToolExecutor::invoke`] touches no store, so callers that only need to
//! record the run can call the tool first and open their unit of work after.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ToolConfig;
use crate::error::AppResult;
use crate::events::{DomainEvent, ToolExecuted};
use crate::models::{Evidence, EvidenceType, IncidentEvent, ToolExecutionLog, ToolExecutionStatus};
use crate::services::outbox;
use crate::services::rate_limiter::{self, ToolRateLimiter};
use crate::services::tools::{Tool, ToolParameters, ToolRegistry, ToolRequest, ToolResponse};
use crate::store::UnitOfWork;
use crate::tenant::TenantId;

#[derive(Debug, Clone)]
pub struct ExecuteToolCommand {
    pub incident_id: Option<Uuid>,
    pub tool_name: String,
    pub parameters: ToolParameters,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub execution_id: Uuid,
    pub tool_name: String,
    pub status: ToolExecutionStatus,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub retry_count: i32,
    pub evidence_id: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
}

/// A finished tool call, not yet recorded.
#[derive(Debug)]
pub struct ToolOutcome {
    status: ToolExecutionStatus,
    response: Option<ToolResponse>,
    error_message: Option<String>,
    duration_ms: i64,
    retry_count: i32,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    limiter: Box<dyn ToolRateLimiter>,
    config: ToolConfig,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, limiter: Box<dyn ToolRateLimiter>, config: ToolConfig) -> Self {
        Self {
            registry,
            limiter,
            config,
        }
    }

    /// Executor over `registry` with the rate limit from `config`.
    pub fn from_config(registry: ToolRegistry, config: ToolConfig) -> Self {
        let limiter = rate_limiter::from_config(config.rate_per_sec, config.burst);
        Self::new(registry, limiter, config)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke and record in one unit of work.
    pub async fn execute(
        &self,
        uow: &mut dyn UnitOfWork,
        command: ExecuteToolCommand,
    ) -> AppResult<ToolExecutionResult> {
        let tenant = uow.tenant()?.clone();
        let outcome = self.invoke(&tenant, &command).await?;
        self.record(uow, &command, outcome).await
    }

    /// Rate limit, look up and run the tool. A rate-limited call never reaches
    /// the tool; an unknown tool is `TOOL_NOT_FOUND`.
    pub async fn invoke(&self, tenant: &TenantId, command: &ExecuteToolCommand) -> AppResult<ToolOutcome> {
        let tool_name = command.tool_name.clone();

        if !self.limiter.try_acquire(&tool_name, tenant.as_str()) {
            tracing::info!(tool = %tool_name, tenant = %tenant, "Tool rate-limited");
            return Ok(ToolOutcome {
                status: ToolExecutionStatus::RateLimited,
                response: None,
                error_message: Some(format!("Rate limit exceeded for tool: {tool_name}")),
                duration_ms: 0,
                retry_count: 0,
            });
        }

        let tool = self.registry.get_by_name(&tool_name)?;
        let request = ToolRequest {
            incident_id: command.incident_id,
            tool_name,
            parameters: command.parameters.clone(),
            requested_by: command.requested_by.clone(),
        };
        Ok(self.run(tool, request).await)
    }

    /// Retry inside, deadline outside: the deadline bounds the whole cycle and
    /// dropping the future cancels the attempt in flight.
    async fn run(&self, tool: Arc<dyn Tool>, request: ToolRequest) -> ToolOutcome {
        let retries = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let attempts = {
            let retries = retries.clone();
            let max_attempts = self.config.max_attempts.max(1);
            let wait = self.config.retry_wait;
            async move {
                let mut attempt = 1;
                loop {
                    match tool.execute(&request).await {
                        Ok(response) => return Ok(response),
                        Err(e) if attempt < max_attempts => {
                            tracing::warn!(
                                tool = %request.tool_name,
                                attempt,
                                error = %e,
                                "Tool call failed, retrying"
                            );
                            retries.store(attempt, Ordering::SeqCst);
                            attempt += 1;
                            tokio::time::sleep(wait).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        let result = tokio::time::timeout(self.config.timeout, attempts).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let retry_count = i32::try_from(retries.load(Ordering::SeqCst)).unwrap_or(i32::MAX);

        let (status, response, error_message) = match result {
            Ok(Ok(response)) if response.success => (ToolExecutionStatus::Success, Some(response), None),
            Ok(Ok(response)) => {
                let error = response.error_message.clone();
                (ToolExecutionStatus::Failure, Some(response), error)
            }
            Ok(Err(e)) => (ToolExecutionStatus::Failure, None, Some(e.to_string())),
            Err(_) => (
                ToolExecutionStatus::Timeout,
                None,
                Some("Tool execution timed out".to_string()),
            ),
        };

        ToolOutcome {
            status,
            response,
            error_message,
            duration_ms,
            retry_count,
        }
    }

    /// Persist a finished run through `uow`.
    pub async fn record(
        &self,
        uow: &mut dyn UnitOfWork,
        command: &ExecuteToolCommand,
        outcome: ToolOutcome,
    ) -> AppResult<ToolExecutionResult> {
        let tenant = uow.tenant()?.to_string();
        let now = Utc::now();
        let content = outcome.response.as_ref().and_then(|r| r.content.clone());

        let log = ToolExecutionLog {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            tool_name: command.tool_name.clone(),
            incident_id: command.incident_id,
            status: outcome.status,
            request_payload: serde_json::to_value(&command.parameters)?,
            response_content: content.clone(),
            error_message: outcome.error_message.clone(),
            duration_ms: outcome.duration_ms,
            retry_count: outcome.retry_count,
            requested_by: command.requested_by.clone(),
            executed_at: now,
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: command.requested_by.clone(),
        };
        uow.insert_tool_log(&log).await?;

        crate::metrics::tool_executed(
            &command.tool_name,
            outcome.status.as_str(),
            u64::try_from(outcome.duration_ms).unwrap_or(0),
        );

        let mut evidence_id = None;
        if let Some(incident_id) = command.incident_id {
            match (&outcome.response, outcome.status) {
                (Some(response), ToolExecutionStatus::Success) => {
                    let title = format!("Tool output: {}", command.tool_name);
                    let mut evidence = Evidence::new(
                        &tenant,
                        incident_id,
                        EvidenceType::ToolOutput,
                        &title,
                        response.content.clone(),
                    );
                    evidence.metadata = serde_json::to_value(&response.metadata)?;
                    evidence.created_by = command.requested_by.clone();
                    uow.insert_evidence(&evidence).await?;
                    uow.insert_event(
                        &IncidentEvent::evidence_added(&tenant, incident_id, &title, EvidenceType::ToolOutput.as_str())
                            .by(&command.requested_by),
                    )
                    .await?;
                    evidence_id = Some(evidence.id);
                }
                _ => {
                    uow.insert_event(
                        &IncidentEvent::tool_executed(&tenant, incident_id, &command.tool_name, outcome.status.as_str())
                            .by(&command.requested_by),
                    )
                    .await?;
                }
            }
        }

        outbox::append(
            uow,
            DomainEvent::ToolExecuted(ToolExecuted {
                execution_id: log.id,
                tool_name: command.tool_name.clone(),
                status: outcome.status.as_str().to_string(),
                duration_ms: outcome.duration_ms,
            }),
        )
        .await?;

        tracing::info!(
            tool = %command.tool_name,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            retries = outcome.retry_count,
            evidence_id = ?evidence_id,
            "Tool executed"
        );

        Ok(ToolExecutionResult {
            execution_id: log.id,
            tool_name: command.tool_name.clone(),
            status: outcome.status,
            content,
            error_message: outcome.error_message,
            duration_ms: outcome.duration_ms,
            retry_count: outcome.retry_count,
            evidence_id,
            executed_at: log.executed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{Incident, IncidentSeverity};
    use crate::services::rate_limiter::{TokenBucketLimiter, Unlimited};
    use crate::store::{MemoryStore, Scope, Store};
    use crate::tenant::TenantId;

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<ToolResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("Transient error");
            }
            Ok(ToolResponse::success("ok", BTreeMap::new()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<ToolResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResponse::success("late", BTreeMap::new()))
        }
    }

    fn fast_config() -> ToolConfig {
        ToolConfig {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            retry_wait: Duration::from_millis(1),
            rate_per_sec: 0,
            burst: 10,
        }
    }

    fn executor(registry: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(registry, Box::new(Unlimited), fast_config())
    }

    fn command(tool: &str, incident_id: Option<Uuid>) -> ExecuteToolCommand {
        ExecuteToolCommand {
            incident_id,
            tool_name: tool.into(),
            parameters: BTreeMap::from([("service".into(), "checkout".into())]),
            requested_by: "alice".into(),
        }
    }

    async fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let tenant = TenantId::parse("acme").unwrap();
        let mut uow = store.begin(Scope::Tenant(tenant)).await.unwrap();
        let incident = Incident::new("acme", "inc-1", "Checkout down", None, IncidentSeverity::Sev2, None, serde_json::json!({}));
        uow.insert_incident(&incident).await.unwrap();
        uow.commit().await.unwrap();
        (store, incident.id)
    }

    async fn uow(store: &MemoryStore) -> Box<dyn UnitOfWork> {
        store
            .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn success_with_incident_stores_evidence_and_timeline() {
        let (store, incident_id) = seeded().await;
        let mut uow = uow(&store).await;
        let result = executor(ToolRegistry::with_builtin_tools())
            .execute(uow.as_mut(), command("logs", Some(incident_id)))
            .await
            .unwrap();

        assert_eq!(result.status, ToolExecutionStatus::Success);
        assert_eq!(result.retry_count, 0);
        let evidence_id = result.evidence_id.unwrap();

        let evidence = uow.list_evidence(incident_id).await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].id, evidence_id);
        assert_eq!(evidence[0].title, "Tool output: logs");
        assert_eq!(evidence[0].metadata["service"], "checkout");

        let events = uow.list_events(incident_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Evidence added: Tool output: logs");

        let outbox = uow.list_unpublished(10).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "TOOL_EXECUTED");
        assert!(uow.find_tool_log(result.execution_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn success_without_incident_stores_no_evidence() {
        let (store, _) = seeded().await;
        let mut uow = uow(&store).await;
        let result = executor(ToolRegistry::with_builtin_tools())
            .execute(uow.as_mut(), command("metrics", None))
            .await
            .unwrap();
        assert_eq!(result.status, ToolExecutionStatus::Success);
        assert!(result.evidence_id.is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (store, _) = seeded().await;
        let mut uow = uow(&store).await;
        let registry = ToolRegistry::new().register(Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let result = executor(registry)
            .execute(uow.as_mut(), command("flaky", None))
            .await
            .unwrap();
        assert_eq!(result.status, ToolExecutionStatus::Success);
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_the_last_error() {
        let (store, incident_id) = seeded().await;
        let mut uow = uow(&store).await;
        let registry = ToolRegistry::new().register(Flaky {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let result = executor(registry)
            .execute(uow.as_mut(), command("flaky", Some(incident_id)))
            .await
            .unwrap();
        assert_eq!(result.status, ToolExecutionStatus::Failure);
        assert_eq!(result.error_message.as_deref(), Some("Transient error"));
        assert_eq!(result.retry_count, 2);
        assert!(result.evidence_id.is_none());
        assert!(uow.list_evidence(incident_id).await.unwrap().is_empty());
        let events = uow.list_events(incident_id).await.unwrap();
        assert_eq!(events[0].description, "Tool executed: flaky (FAILURE)");
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let (store, _) = seeded().await;
        let mut uow = uow(&store).await;
        let result = executor(ToolRegistry::new().register(Slow))
            .execute(uow.as_mut(), command("slow", None))
            .await
            .unwrap();
        assert_eq!(result.status, ToolExecutionStatus::Timeout);
        assert_eq!(result.error_message.as_deref(), Some("Tool execution timed out"));
    }

    #[tokio::test]
    async fn rate_limited_calls_skip_the_tool() {
        let (store, _) = seeded().await;
        let mut uow = uow(&store).await;
        let executor = ToolExecutor::new(
            ToolRegistry::with_builtin_tools(),
            Box::new(TokenBucketLimiter::new(1, 1)),
            fast_config(),
        );
        let first = executor.execute(uow.as_mut(), command("logs", None)).await.unwrap();
        assert_eq!(first.status, ToolExecutionStatus::Success);
        let second = executor.execute(uow.as_mut(), command("logs", None)).await.unwrap();
        assert_eq!(second.status, ToolExecutionStatus::RateLimited);
        assert_eq!(second.duration_ms, 0);
        assert_eq!(second.error_message.as_deref(), Some("Rate limit exceeded for tool: logs"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let (store, _) = seeded().await;
        let mut uow = uow(&store).await;
        let err = executor(ToolRegistry::with_builtin_tools())
            .execute(uow.as_mut(), command("kubectl", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
    }
}
