//! Request-scoped tenant context.
//!
//! The tenant lives in a task-local set by the request middleware (or the webhook
//! handler). It is gone when the scoped future completes, so it never leaks into
//! another request's task.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Identifier of the customer owning a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Build from a header or path value. Blank values are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("X-Customer-Id header is required")]
pub struct MissingTenant;

/// Run `fut` with `tenant` as the current tenant.
pub async fn scope<F>(tenant: TenantId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TENANT.scope(tenant, fut).await
}

/// The tenant of the running task, if one was set.
pub fn current() -> Option<TenantId> {
    CURRENT_TENANT.try_with(|t| t.clone()).ok()
}

/// The tenant of the running task, or `MissingTenant`.
pub fn require() -> Result<TenantId, MissingTenant> {
    current().ok_or(MissingTenant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_rejected() {
        assert!(TenantId::parse("   ").is_none());
        assert_eq!(TenantId::parse(" acme ").unwrap().as_str(), "acme");
    }

    #[tokio::test]
    async fn tenant_is_visible_only_inside_scope() {
        assert_eq!(require(), Err(MissingTenant));
        let t = TenantId::parse("acme").unwrap();
        let seen = scope(t.clone(), async { require() }).await;
        assert_eq!(seen, Ok(t));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_share_tenant() {
        let a = tokio::spawn(scope(TenantId::parse("a").unwrap(), async {
            tokio::task::yield_now().await;
            current()
        }));
        let b = tokio::spawn(scope(TenantId::parse("b").unwrap(), async {
            tokio::task::yield_now().await;
            current()
        }));
        assert_eq!(a.await.unwrap().unwrap().as_str(), "a");
        assert_eq!(b.await.unwrap().unwrap().as_str(), "b");
    }
}
