use crate::{ApiError, AppState, BuildRequest};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use dockyard_common::{DockyardError, NewImage};
use dockyard_orchestrator::Submission;
use serde_json::{json, Value};
use tracing::{info, warn};

type ApiResult = Result<Json<Value>, ApiError>;

pub(crate) async fn list_images(State(state): State<AppState>) -> ApiResult {
    let images = state.store.list_images().await?;
    Ok(Json(json!({ "images": images })))
}

pub(crate) async fn create_image(
    State(state): State<AppState>,
    Json(req): Json<NewImage>,
) -> ApiResult {
    if let Err(e) = req.validate() {
        warn!(name = %req.name, error = %e, "Rejected image definition");
        let message = match e {
            DockyardError::Invalid(message) => message,
            other => other.to_string(),
        };
        return Err(ApiError::InvalidImage(message));
    }

    let image = state.store.create_image(req).await?;
    info!(image_id = image.id, name = %image.name, "Image registered");
    Ok(Json(json!({ "status": "ok", "image": image })))
}

pub(crate) async fn list_builds(State(state): State<AppState>) -> ApiResult {
    let builds = state.store.list_builds().await?;
    Ok(Json(json!({ "builds": builds })))
}

pub(crate) async fn get_build(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let build = state.store.get_build(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "build": build })))
}

pub(crate) async fn create_build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> ApiResult {
    match state.orchestrator.submit_build(req.image_id).await? {
        Submission::Accepted(build) => Ok(Json(json!({ "status": "ok", "build": build }))),
        Submission::NotFound => Err(ApiError::NotFound),
    }
}

pub(crate) async fn stop_build(
    State(state): State<AppState>,
    Path(build_id): Path<i64>,
) -> ApiResult {
    match state.orchestrator.submit_stop(build_id).await? {
        Submission::Accepted(_) => Ok(Json(json!({ "status": "ok" }))),
        Submission::NotFound => Err(ApiError::NotFound),
    }
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
