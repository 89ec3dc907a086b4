//! Error handling for the stock reconciliation engine
//!
//! Every core operation returns [`AppResult`]. Validation, not-found and
//! conflict errors are raised before any write; persistence errors may occur
//! mid-sequence, in which case the service wraps them in
//! [`AppError::PartialFailure`] so an operator can reconcile by hand.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{LineItemViolation, ReturnLimitError};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Concurrency errors
    #[error("Concurrency conflict on {resource}: {message}")]
    ConcurrencyConflict { resource: String, message: String },

    // Multi-step mutation stopped after some writes landed
    #[error("Partial failure in {operation} for {entity_id} at step {failed_step}: {reason}")]
    PartialFailure {
        operation: &'static str,
        entity_id: Uuid,
        failed_step: &'static str,
        completed_steps: Vec<&'static str>,
        reason: String,
    },

    // Store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ConcurrencyConflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Failures of the underlying store, including partial ones
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Persistence(_) | AppError::DatabaseError(_) | AppError::PartialFailure { .. }
        )
    }

    /// Message suitable for a user-facing toast
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::NotFound(resource) => format!("{} not found", resource),
            AppError::ConcurrencyConflict { resource, .. } => format!(
                "{} was changed by someone else. Reload and try again.",
                resource
            ),
            AppError::PartialFailure { .. } => {
                "The change could not be completed. An operator has been alerted.".to_string()
            }
            _ => "The change could not be saved. Please try again.".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field));
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("input".to_string(), "Invalid input".to_string()));
        AppError::Validation { field, message }
    }
}

impl From<LineItemViolation> for AppError {
    fn from(violation: LineItemViolation) -> Self {
        AppError::Validation {
            field: violation.field,
            message: violation.message.to_string(),
        }
    }
}

impl From<ReturnLimitError> for AppError {
    fn from(err: ReturnLimitError) -> Self {
        AppError::validation("items", err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message: message.clone(),
                    field: Some(field.clone()),
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "NOT_FOUND".to_string(),
                    message: format!("{} not found", resource),
                    field: None,
                },
            ),
            AppError::ConcurrencyConflict { resource, message } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "CONCURRENCY_CONFLICT".to_string(),
                    message: message.clone(),
                    field: Some(resource.clone()),
                },
            ),
            AppError::PartialFailure { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "PARTIAL_FAILURE".to_string(),
                    message: self.user_message(),
                    field: None,
                },
            ),
            AppError::Persistence(_) | AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "PERSISTENCE_ERROR".to_string(),
                    message: "A storage error occurred".to_string(),
                    field: None,
                },
            ),
            AppError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "CONFIGURATION_ERROR".to_string(),
                    message: format!("Configuration error: {}", msg),
                    field: None,
                },
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message: msg.clone(),
                    field: None,
                },
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred".to_string(),
                    field: None,
                },
            ),
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_classification() {
        assert!(AppError::Persistence("down".into()).is_persistence());
        assert!(AppError::PartialFailure {
            operation: "update_purchase",
            entity_id: Uuid::nil(),
            failed_step: "replace_items",
            completed_steps: vec!["reverse_previous_items"],
            reason: "down".into(),
        }
        .is_persistence());
        assert!(!AppError::NotFound("Purchase".into()).is_persistence());
        assert!(!AppError::validation("items", "empty").is_persistence());
    }

    #[test]
    fn test_user_messages_are_specific_for_caller_errors() {
        assert_eq!(
            AppError::validation("items", "At least one line item is required").user_message(),
            "At least one line item is required"
        );
        assert_eq!(AppError::NotFound("Purchase".into()).user_message(), "Purchase not found");
        assert!(AppError::Persistence("connection reset".into())
            .user_message()
            .starts_with("The change could not be saved"));
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::conflict("Purchase", "stale version").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = AppError::NotFound("Purchase".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
