//! Error handling for the fulfillment engine
//!
//! Workflow errors are user-facing and recoverable; storage and internal
//! errors are reported without leaking their detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{ErrorDetails, WorkflowError};
use thiserror::Error;

use crate::store::StoreError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Business rule errors
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::NotFound(resource.into()))
    }

    /// The workflow error kind, if this is one
    pub fn workflow(&self) -> Option<&WorkflowError> {
        match self {
            AppError::Workflow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(resource) => {
                AppError::Workflow(WorkflowError::ConcurrentModification { resource })
            }
            StoreError::Duplicate { field, value } => AppError::Workflow(WorkflowError::validation(
                field,
                format!("{} {} is already in use", field, value),
            )),
            StoreError::NotFound(resource) => AppError::not_found(resource),
            StoreError::Corrupt(msg) => AppError::StorageError(msg),
            StoreError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Workflow(shared::first_field_error(&errors))
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

fn workflow_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::Validation { .. } => StatusCode::BAD_REQUEST,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Precondition { .. }
        | WorkflowError::PaymentPending { .. }
        | WorkflowError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        WorkflowError::OverDelivery { .. }
        | WorkflowError::InsufficientInventory { .. }
        | WorkflowError::InsufficientSelection { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Workflow(err) => {
                tracing::warn!(code = err.code(), "Request rejected: {}", err);
                let field = match err {
                    WorkflowError::Validation { field, .. } => Some(field.clone()),
                    _ => None,
                };
                (
                    workflow_status(err),
                    ErrorDetail {
                        code: err.code().to_string(),
                        message: err.to_string(),
                        field,
                        details: err.details(),
                    },
                )
            }
            AppError::StorageError(_) | AppError::DatabaseError(_) => {
                tracing::error!("Error: {:?}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorDetail {
                        code: "STORAGE_ERROR".to_string(),
                        message: "A storage error occurred; the request can be retried".to_string(),
                        field: None,
                        details: None,
                    },
                )
            }
            AppError::Configuration(msg) => {
                tracing::error!("Error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail {
                        code: "CONFIGURATION_ERROR".to_string(),
                        message: format!("Configuration error: {}", msg),
                        field: None,
                        details: None,
                    },
                )
            }
            AppError::InternalError(_) => {
                tracing::error!("Error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail {
                        code: "INTERNAL_ERROR".to_string(),
                        message: "An internal server error occurred".to_string(),
                        field: None,
                        details: None,
                    },
                )
            }
        };

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;
