//! `/api/record-pools` and `/api/wildcard-pools`. Both share one router; the pool kind
//! is carried as a request extension.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use tracing::error;

use crate::db::entities::rotation_history;
use crate::db::enums::{PoolKind, RotationTrigger};
use crate::rotation::{PoolRef, PoolSnapshot, RotationOutcome};
use crate::web::models::pool_models::{
    CreateRecordPool, CreateWildcardPool, HistoryQuery, PoolDetails, RotateQuery, UpdatePool,
};
use crate::web::{AppError, AppState};

pub fn create_pool_router(kind: PoolKind) -> Router<Arc<AppState>> {
    let collection = match kind {
        PoolKind::Record => get(list_pools).post(create_record_pool),
        PoolKind::Wildcard => get(list_pools).post(create_wildcard_pool),
    };
    Router::new()
        .route("/", collection)
        .route("/{id}", get(get_pool).put(update_pool).delete(delete_pool))
        .route("/{id}/rotate", post(rotate_pool))
        .route("/{id}/pause", post(pause_pool))
        .route("/{id}/resume", post(resume_pool))
        .route("/{id}/history", get(get_history))
        .layer(Extension(kind))
}

async fn list_pools(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
) -> Result<Json<Vec<PoolSnapshot>>, AppError> {
    Ok(Json(app_state.pool_manager.list(kind).await?))
}

async fn create_record_pool(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateRecordPool>,
) -> Result<(StatusCode, Json<PoolDetails>), AppError> {
    let details = app_state.pool_manager.create_record_pool(payload).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn create_wildcard_pool(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateWildcardPool>,
) -> Result<(StatusCode, Json<PoolDetails>), AppError> {
    let details = app_state.pool_manager.create_wildcard_pool(payload).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn get_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
) -> Result<Json<PoolDetails>, AppError> {
    Ok(Json(app_state.pool_manager.details(PoolRef { kind, id }).await?))
}

async fn update_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdatePool>,
) -> Result<Json<PoolDetails>, AppError> {
    let details = app_state
        .pool_manager
        .update_pool(PoolRef { kind, id }, payload)
        .await?;
    Ok(Json(details))
}

async fn delete_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    app_state.pool_manager.delete_pool(PoolRef { kind, id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The rotation runs in its own task so a dropped connection cannot cancel a DNS update
/// half way.
async fn rotate_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
    Query(query): Query<RotateQuery>,
) -> Result<Json<RotationOutcome>, AppError> {
    let pool = PoolRef { kind, id };
    let manager = app_state.pool_manager.clone();
    let handle = tokio::spawn(async move {
        manager
            .rotate(pool, query.vps_id, RotationTrigger::Manual)
            .await
    });
    let outcome = handle.await.map_err(|e| {
        error!(pool = %pool, error = %e, "Rotation task panicked or was aborted.");
        AppError::InternalServerError(format!("rotation task failed: {e}"))
    })??;
    Ok(Json(outcome))
}

async fn pause_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
) -> Result<Json<PoolSnapshot>, AppError> {
    let pool = app_state
        .pool_manager
        .set_paused(PoolRef { kind, id }, true)
        .await?;
    Ok(Json(pool))
}

async fn resume_pool(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
) -> Result<Json<PoolSnapshot>, AppError> {
    let pool = app_state
        .pool_manager
        .set_paused(PoolRef { kind, id }, false)
        .await?;
    Ok(Json(pool))
}

async fn get_history(
    State(app_state): State<Arc<AppState>>,
    Extension(kind): Extension<PoolKind>,
    Path(id): Path<i32>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<rotation_history::Model>>, AppError> {
    let rows = app_state
        .pool_manager
        .history(PoolRef { kind, id }, query.limit)
        .await?;
    Ok(Json(rows))
}
