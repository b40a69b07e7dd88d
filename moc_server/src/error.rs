//! HTTP-facing error taxonomy and its JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::{InvalidActionTransition, InvalidTransition};
use crate::store::StoreError;
use crate::tenant::MissingTenant;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing or invalid X-Api-Key header")]
    Unauthorized,

    #[error("X-Customer-Id header is required")]
    MissingTenant,

    #[error("Request validation failed")]
    Validation(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    #[error("Action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("Graph node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    InvalidActionTransition(#[from] InvalidActionTransition),

    #[error("Alert denied by policy: {0}")]
    PolicyDenied(String),

    #[error("Estimated token usage {estimated} exceeds budget {budget}")]
    TokenBudgetExceeded { estimated: usize, budget: usize },

    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn incident_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("Incident not found: {id}"))
    }

    pub fn alert_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("Alert not found: {id}"))
    }

    /// Taxonomy code written to the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::MissingTenant => "MISSING_TENANT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ActionNotFound(_) => "ACTION_NOT_FOUND",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::InvalidActionTransition(_) => "INVALID_ACTION_TRANSITION",
            Self::PolicyDenied(_) => "POLICY_DENIED",
            Self::TokenBudgetExceeded { .. } => "TOKEN_BUDGET_EXCEEDED",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MissingTenant
            | Self::Validation(_)
            | Self::InvalidPayload(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_)
            | Self::ActionNotFound(_)
            | Self::NodeNotFound(_)
            | Self::ToolNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition(_)
            | Self::InvalidActionTransition(_)
            | Self::PolicyDenied(_)
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TokenBudgetExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingTenant => Self::MissingTenant,
            StoreError::Conflict { .. } | StoreError::StaleVersion { .. } => {
                Self::Conflict(err.to_string())
            }
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<MissingTenant> for AppError {
    fn from(_: MissingTenant) -> Self {
        Self::MissingTenant
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                tracing::error!(error = %e, "Unhandled error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut body = serde_json::json!({
            "error": self.code(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Self::Validation(details) = &self {
            body["details"] = serde_json::json!(details);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentStatus;

    #[test]
    fn transition_errors_are_conflicts_and_name_both_states() {
        let err: AppError = InvalidTransition {
            from: IncidentStatus::New,
            to: IncidentStatus::Resolved,
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "INVALID_TRANSITION");
        let msg = err.to_string();
        assert!(msg.contains("NEW") && msg.contains("RESOLVED"), "{msg}");
    }

    #[test]
    fn store_conflicts_map_to_409() {
        let err: AppError = StoreError::Conflict {
            entity: "Alert",
            key: "a-1".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");

        let err: AppError = StoreError::MissingTenant.into();
        assert_eq!(err.code(), "MISSING_TENANT");
    }

    #[test]
    fn budget_error_is_payload_too_large() {
        let err = AppError::TokenBudgetExceeded {
            estimated: 5000,
            budget: 4096,
        };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "Estimated token usage 5000 exceeds budget 4096");
    }

    #[tokio::test]
    async fn validation_body_carries_details() {
        let resp = AppError::Validation(vec!["title: must not be blank".into()]).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert_eq!(body["details"][0], "title: must not be blank");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        let resp = AppError::Internal(anyhow::anyhow!("db exploded")).into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "An unexpected error occurred");
    }
}
