use axum::{Json, Router, http::Method, routing::get};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::db::enums::PoolKind;
use crate::passthrough::PassthroughGenerator;
use crate::server::deployment_dispatcher::DeploymentDispatcher;
use crate::services::pool_manager::PoolManager;
use crate::web::routes::{passthrough_routes, pool_routes};

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabaseConnection,
    pub pool_manager: Arc<PoolManager>,
    pub dispatcher: Arc<DeploymentDispatcher>,
    pub generator: PassthroughGenerator,
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(health_check_handler))
        .nest("/record-pools", pool_routes::create_pool_router(PoolKind::Record))
        .nest("/wildcard-pools", pool_routes::create_pool_router(PoolKind::Wildcard))
        .nest("/machines", passthrough_routes::create_passthrough_router());

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .with_state(app_state)
}
