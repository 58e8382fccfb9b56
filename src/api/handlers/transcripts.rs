use crate::api::error::AppError;
use crate::entities::transcripts;
use crate::services::transcript_service::TranscriptSegment;
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct TranscriptResponse {
    pub status: String,
    pub language: Option<String>,
    pub full_text: Option<String>,
    pub segments: Vec<TranscriptSegment>,
    pub error_message: Option<String>,
}

impl From<transcripts::Model> for TranscriptResponse {
    fn from(m: transcripts::Model) -> Self {
        let segments: Vec<TranscriptSegment> =
            serde_json::from_value(m.segments).unwrap_or_default();
        Self {
            status: m.status,
            language: m.language,
            full_text: m.full_text,
            segments,
            error_message: m.error_message,
        }
    }
}

#[utoipa::path(
    get,
    path = "/videos/{id}/transcript",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Transcript read model", body = TranscriptResponse),
        (status = 404, description = "Video or transcript not found")
    ),
    security(("jwt" = []))
)]
pub async fn get_transcript(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptResponse>, AppError> {
    let transcript = state.transcripts.get_for_asset(&claims.sub, &id).await?;
    Ok(Json(TranscriptResponse::from(transcript)))
}

#[utoipa::path(
    post,
    path = "/videos/{id}/transcript/retry",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Transcription re-enqueued", body = TranscriptResponse),
        (status = 409, description = "Transcription is already in progress")
    ),
    security(("jwt" = []))
)]
pub async fn retry_transcript(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptResponse>, AppError> {
    let transcript = state.transcripts.retry(&claims.sub, &id).await?;
    Ok(Json(TranscriptResponse::from(transcript)))
}
