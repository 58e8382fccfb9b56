use crate::api::error::AppError;
use crate::api::handlers::videos::VideoResponse;
use crate::services::chunk_store::{AppendReceipt, SessionStatus};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, Validate, ToSchema)]
pub struct StartRecordingRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Container mime type the client is capturing (default: video/webm)
    pub mime_type: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct StartRecordingResponse {
    pub session_id: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CompleteRecordingRequest {
    /// Duration in seconds as measured by the client; re-measured server-side
    /// during conversion.
    #[validate(range(min = 0.0))]
    pub duration_seconds: f64,
    pub description: Option<String>,
}

#[utoipa::path(
    post,
    path = "/recordings",
    request_body = StartRecordingRequest,
    responses(
        (status = 200, description = "Recording session started", body = StartRecordingResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = []))
)]
pub async fn start_recording(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartRecordingRequest>,
) -> Result<Json<StartRecordingResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let mime_type = req.mime_type.unwrap_or_else(|| "video/webm".to_string());
    let session_id = state
        .chunk_store
        .start_session(&claims.sub, &req.title, &mime_type)
        .await?;

    Ok(Json(StartRecordingResponse { session_id }))
}

#[utoipa::path(
    put,
    path = "/recordings/{session_id}/chunks/{index}",
    request_body(content = Vec<u8>, description = "Raw chunk bytes", content_type = "application/octet-stream"),
    params(
        ("session_id" = String, Path, description = "Recording session ID"),
        ("index" = u32, Path, description = "Zero-based chunk index")
    ),
    responses(
        (status = 200, description = "Chunk stored", body = AppendReceipt),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session not found")
    ),
    security(("jwt" = []))
)]
pub async fn append_chunk(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path((session_id, index)): Path<(String, u32)>,
    body: axum::body::Bytes,
) -> Result<Json<AppendReceipt>, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Empty chunk".to_string()));
    }

    let receipt = state
        .chunk_store
        .append_chunk(&claims.sub, &session_id, index, &body)
        .await?;

    Ok(Json(receipt))
}

#[utoipa::path(
    get,
    path = "/recordings/{session_id}",
    params(("session_id" = String, Path, description = "Recording session ID")),
    responses(
        (status = 200, description = "Session status", body = SessionStatus),
        (status = 404, description = "Session not found")
    ),
    security(("jwt" = []))
)]
pub async fn session_status(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    let status = state.chunk_store.session_status(&claims.sub, &session_id)?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/recordings/{session_id}/complete",
    request_body = CompleteRecordingRequest,
    params(("session_id" = String, Path, description = "Recording session ID")),
    responses(
        (status = 200, description = "Recording assembled into a video", body = VideoResponse),
        (status = 400, description = "Partial upload or invalid duration"),
        (status = 404, description = "Session not found")
    ),
    security(("jwt" = []))
)]
pub async fn complete_recording(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
    Json(req): Json<CompleteRecordingRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let asset = state
        .recordings
        .complete_session(&claims.sub, &session_id, req.duration_seconds, req.description)
        .await?;

    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    delete,
    path = "/recordings/{session_id}",
    params(("session_id" = String, Path, description = "Recording session ID")),
    responses(
        (status = 204, description = "Session cancelled and chunks removed"),
        (status = 404, description = "Session not found")
    ),
    security(("jwt" = []))
)]
pub async fn cancel_recording(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .chunk_store
        .cancel_session(&claims.sub, &session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
