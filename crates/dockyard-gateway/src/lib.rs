// HTTP surface for images and builds

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dockyard_orchestrator::{Orchestrator, OrchestratorError};
use dockyard_store::{StatusStore, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod handlers;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Not found")]
    NotFound,
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidImage(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message, "code": "INVALID_IMAGE" })),
            )
                .into_response(),
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "status": "Not found" }))).into_response()
            }
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message, "code": "INTERNAL" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    pub image_id: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub orchestrator: Orchestrator,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/images",
            get(handlers::list_images).post(handlers::create_image),
        )
        .route(
            "/builds",
            get(handlers::list_builds).post(handlers::create_build),
        )
        .route("/builds/:id", get(handlers::get_build))
        .route("/stop/:build_id", post(handlers::stop_build))
        .route("/health", get(handlers::health))
        .with_state(state)
}
