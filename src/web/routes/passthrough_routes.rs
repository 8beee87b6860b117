use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use sea_orm::EntityTrait;
use std::sync::Arc;

use crate::db::entities::prelude::Vps;
use crate::passthrough::render_nginx;
use crate::server::deployment_dispatcher::ApplyResult;
use crate::web::models::pool_models::{ApplyQuery, PassthroughPreview};
use crate::web::{AppError, AppState};

pub fn create_passthrough_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}/passthrough-config", get(preview_config))
        .route("/{id}/passthrough-config/apply", post(apply_config))
}

async fn ensure_machine_exists(app_state: &AppState, vps_id: i32) -> Result<(), AppError> {
    Vps::find_by_id(vps_id)
        .one(&app_state.db_pool)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("machine {vps_id}")))
}

async fn preview_config(
    State(app_state): State<Arc<AppState>>,
    Path(vps_id): Path<i32>,
) -> Result<Json<PassthroughPreview>, AppError> {
    ensure_machine_exists(&app_state, vps_id).await?;
    let config = app_state.generator.generate(vps_id).await?;
    let rendered = config
        .as_ref()
        .map(|c| render_nginx(c, &app_state.dispatcher.settings().passthrough));
    Ok(Json(PassthroughPreview {
        vps_id,
        config,
        rendered,
    }))
}

/// `?wait=true` blocks until the job is terminal, bounded by the configured cap.
async fn apply_config(
    State(app_state): State<Arc<AppState>>,
    Path(vps_id): Path<i32>,
    Query(query): Query<ApplyQuery>,
) -> Result<Json<ApplyResult>, AppError> {
    ensure_machine_exists(&app_state, vps_id).await?;
    let result = app_state.dispatcher.apply(vps_id, query.wait).await?;
    Ok(Json(result))
}
