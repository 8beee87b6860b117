use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::services::PoolStoreError;
use crate::rotation::RotationError;
use crate::server::deployment_dispatcher::DispatchError;
use crate::services::pool_manager::PoolManagerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Upstream error: {0}")]
    UpstreamError(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::UpstreamError(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<PoolStoreError> for AppError {
    fn from(err: PoolStoreError) -> Self {
        match err {
            PoolStoreError::NotFound(msg) => AppError::NotFound(msg),
            PoolStoreError::Conflict(msg) => AppError::Conflict(msg),
            PoolStoreError::InvalidInput(msg) => AppError::InvalidInput(msg),
            PoolStoreError::Database(e) => e.into(),
        }
    }
}

impl From<RotationError> for AppError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::NoCandidates(_) => AppError::Conflict(err.to_string()),
            RotationError::PoolNotFound(_) => AppError::NotFound(err.to_string()),
            RotationError::NotAMember(..) | RotationError::MachineWithoutIp(_) => {
                AppError::InvalidInput(err.to_string())
            }
            RotationError::Reconciliation(_) | RotationError::Directory(_) => {
                AppError::UpstreamError(err.to_string())
            }
            RotationError::Database(e) => e.into(),
        }
    }
}

impl From<PoolManagerError> for AppError {
    fn from(err: PoolManagerError) -> Self {
        match err {
            PoolManagerError::Store(e) => e.into(),
            PoolManagerError::Rotation(e) => e.into(),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Generation(e) => e.into(),
            DispatchError::WaitTimedOut { .. } => AppError::Timeout(err.to_string()),
            DispatchError::Enqueue(_) | DispatchError::JobVanished(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}
