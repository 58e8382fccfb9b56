use crate::api::error::AppError;
use crate::entities::media_assets;
use crate::services::storage::StorageService;
use crate::services::thumbnail_service::thumbnail_key;
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Serialize, ToSchema)]
pub struct VideoResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: f64,
    pub conversion_status: String,
    pub conversion_progress: i32,
    pub conversion_error: Option<String>,
    pub converted_at: Option<chrono::DateTime<Utc>>,
    pub has_thumbnail: bool,
    pub share_token: String,
    pub is_public: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<media_assets::Model> for VideoResponse {
    fn from(m: media_assets::Model) -> Self {
        Self {
            id: m.id,
            title: m.title,
            description: m.description,
            duration_seconds: m.duration_seconds,
            conversion_status: m.conversion_status,
            conversion_progress: m.conversion_progress,
            conversion_error: m.conversion_error,
            converted_at: m.converted_at.map(Into::into),
            has_thumbnail: m.has_thumbnail,
            share_token: m.share_token,
            is_public: m.is_public,
            created_at: m.created_at.into(),
        }
    }
}

/// Pure projection of the conversion columns for pollers.
#[derive(Serialize, ToSchema)]
pub struct ConversionStatusResponse {
    pub conversion_status: String,
    pub conversion_progress: i32,
    pub conversion_error: Option<String>,
    pub converted_at: Option<chrono::DateTime<Utc>>,
}

impl From<&media_assets::Model> for ConversionStatusResponse {
    fn from(m: &media_assets::Model) -> Self {
        Self {
            conversion_status: m.conversion_status.clone(),
            conversion_progress: m.conversion_progress,
            conversion_error: m.conversion_error.clone(),
            converted_at: m.converted_at.map(Into::into),
        }
    }
}

/// What an anonymous viewer of a shared link gets: no share token echo, no
/// owner-only fields.
#[derive(Serialize, ToSchema)]
pub struct WatchResponse {
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: f64,
    pub conversion_status: String,
    pub has_thumbnail: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<&media_assets::Model> for WatchResponse {
    fn from(m: &media_assets::Model) -> Self {
        Self {
            title: m.title.clone(),
            description: m.description.clone(),
            duration_seconds: m.duration_seconds,
            conversion_status: m.conversion_status.clone(),
            has_thumbnail: m.has_thumbnail,
            created_at: m.created_at.into(),
        }
    }
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct UpdateVideoRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct TrimRequest {
    #[validate(range(min = 0.0))]
    pub start_seconds: f64,
    #[validate(range(min = 0.0))]
    pub end_seconds: f64,
}

#[derive(Deserialize, ToSchema)]
pub struct ShareRequest {
    pub is_public: Option<bool>,
    /// Rotating the token invalidates every previously shared link.
    #[serde(default)]
    pub rotate_token: bool,
}

#[utoipa::path(
    get,
    path = "/videos",
    responses((status = 200, description = "The caller's videos", body = Vec<VideoResponse>)),
    security(("jwt" = []))
)]
pub async fn list_videos(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<VideoResponse>>, AppError> {
    let assets = state.media.list_owned(&claims.sub).await?;
    Ok(Json(assets.into_iter().map(VideoResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/videos/{id}",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Video detail", body = VideoResponse),
        (status = 404, description = "Not found")
    ),
    security(("jwt" = []))
)]
pub async fn get_video(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let asset = state.media.get_owned(&claims.sub, &id).await?;
    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    patch,
    path = "/videos/{id}",
    request_body = UpdateVideoRequest,
    params(("id" = String, Path, description = "Video ID")),
    responses((status = 200, description = "Updated", body = VideoResponse)),
    security(("jwt" = []))
)]
pub async fn update_video(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateVideoRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let asset = state
        .media
        .update_details(&claims.sub, &id, req.title, req.description)
        .await?;
    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    delete,
    path = "/videos/{id}",
    params(("id" = String, Path, description = "Video ID")),
    responses((status = 204, description = "Deleted with derived artifacts")),
    security(("jwt" = []))
)]
pub async fn delete_video(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.media.delete(&claims.sub, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/videos/{id}/status",
    params(("id" = String, Path, description = "Video ID")),
    responses((status = 200, description = "Conversion read model", body = ConversionStatusResponse)),
    security(("jwt" = []))
)]
pub async fn conversion_status(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<ConversionStatusResponse>, AppError> {
    let asset = state.media.get_owned(&claims.sub, &id).await?;
    Ok(Json(ConversionStatusResponse::from(&asset)))
}

#[utoipa::path(
    post,
    path = "/videos/{id}/retry",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Conversion re-enqueued", body = VideoResponse),
        (status = 409, description = "Conversion is not in a failed state")
    ),
    security(("jwt" = []))
)]
pub async fn retry_conversion(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let asset = state.transcodes.retry(&claims.sub, &id).await?;
    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    post,
    path = "/videos/{id}/trim",
    request_body = TrimRequest,
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Trimmed", body = VideoResponse),
        (status = 400, description = "Invalid trim window")
    ),
    security(("jwt" = []))
)]
pub async fn trim_video(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<TrimRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let asset = state
        .transcodes
        .trim(&claims.sub, &id, req.start_seconds, req.end_seconds)
        .await?;
    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    post,
    path = "/videos/{id}/share",
    request_body = ShareRequest,
    params(("id" = String, Path, description = "Video ID")),
    responses((status = 200, description = "Sharing updated", body = VideoResponse)),
    security(("jwt" = []))
)]
pub async fn update_sharing(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    let asset = state
        .media
        .update_sharing(&claims.sub, &id, req.is_public, req.rotate_token)
        .await?;
    Ok(Json(VideoResponse::from(asset)))
}

#[utoipa::path(
    get,
    path = "/videos/{id}/stream",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Full media stream"),
        (status = 206, description = "Partial content"),
        (status = 416, description = "Range not satisfiable")
    ),
    security(("jwt" = []))
)]
pub async fn stream_video(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let asset = state.media.get_owned(&claims.sub, &id).await?;
    stream_media(state.storage.as_ref(), &asset, &headers).await
}

#[utoipa::path(
    get,
    path = "/videos/{id}/thumbnail",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "WebP thumbnail"),
        (status = 404, description = "No thumbnail generated")
    ),
    security(("jwt" = []))
)]
pub async fn get_thumbnail(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let asset = state.media.get_owned(&claims.sub, &id).await?;
    serve_thumbnail(state.storage.as_ref(), &asset).await
}

#[utoipa::path(
    get,
    path = "/watch/{share_token}",
    params(("share_token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "Public video detail", body = WatchResponse),
        (status = 404, description = "Unknown token or video not published")
    )
)]
pub async fn watch_video(
    State(state): State<crate::AppState>,
    Path(share_token): Path<String>,
) -> Result<Json<WatchResponse>, AppError> {
    let asset = state.media.find_public_by_token(&share_token).await?;
    Ok(Json(WatchResponse::from(&asset)))
}

#[utoipa::path(
    get,
    path = "/watch/{share_token}/stream",
    params(("share_token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "Full media stream"),
        (status = 206, description = "Partial content"),
        (status = 404, description = "Unknown token or video not published")
    )
)]
pub async fn watch_stream(
    State(state): State<crate::AppState>,
    Path(share_token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let asset = state.media.find_public_by_token(&share_token).await?;
    stream_media(state.storage.as_ref(), &asset, &headers).await
}

#[utoipa::path(
    get,
    path = "/watch/{share_token}/thumbnail",
    params(("share_token" = String, Path, description = "Share token")),
    responses((status = 200, description = "WebP thumbnail"))
)]
pub async fn watch_thumbnail(
    State(state): State<crate::AppState>,
    Path(share_token): Path<String>,
) -> Result<Response, AppError> {
    let asset = state.media.find_public_by_token(&share_token).await?;
    serve_thumbnail(state.storage.as_ref(), &asset).await
}

/// Serve the stored media with HTTP range support so playback can seek.
async fn stream_media(
    storage: &dyn StorageService,
    asset: &media_assets::Model,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let meta = storage
        .get_object_metadata(&asset.storage_key)
        .await
        .map_err(|e| {
            tracing::error!("Media object missing for {}: {}", asset.id, e);
            AppError::NotFound("Media not available".to_string())
        })?;
    let total = meta.size.max(0) as u64;

    let content_type = content_type_for(&asset.original_extension);
    let disposition = inline_disposition(&asset.title, &asset.original_extension);

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    match range_header.map(|h| parse_range(h, total)) {
        // No Range header, or one we are allowed to ignore as malformed.
        None | Some(RangeOutcome::Ignore) => {
            let object = storage
                .get_object_stream(&asset.storage_key)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let body = Body::from_stream(ReaderStream::new(object.body.into_async_read()));
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, total)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_DISPOSITION, disposition)
                .body(body)
                .unwrap())
        }
        Some(RangeOutcome::Unsatisfiable) => Err(AppError::RangeNotSatisfiable),
        Some(RangeOutcome::Satisfiable(start, end)) => {
            let object = storage
                .get_object_range(&asset.storage_key, &format!("bytes={}-{}", start, end))
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let body = Body::from_stream(ReaderStream::new(object.body.into_async_read()));
            Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, end - start + 1)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .header(header::CONTENT_DISPOSITION, disposition)
                .body(body)
                .unwrap())
        }
    }
}

async fn serve_thumbnail(
    storage: &dyn StorageService,
    asset: &media_assets::Model,
) -> Result<Response, AppError> {
    if !asset.has_thumbnail {
        return Err(AppError::NotFound(
            "Thumbnail not generated yet".to_string(),
        ));
    }

    let data = storage
        .get_file(&thumbnail_key(&asset.id))
        .await
        .map_err(|e| {
            tracing::error!("Thumbnail read failed for {}: {}", asset.id, e);
            AppError::NotFound("Thumbnail not available".to_string())
        })?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/webp")
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from(data))
        .unwrap())
}

#[derive(Debug, PartialEq)]
enum RangeOutcome {
    /// `bytes=start-end` clamped to the object size.
    Satisfiable(u64, u64),
    /// Syntactically valid but out of bounds → 416.
    Unsatisfiable,
    /// Malformed or unsupported (e.g. multi-range) → serve the full body.
    Ignore,
}

fn parse_range(header: &str, total: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Ignore;
    };
    if spec.contains(',') || total == 0 {
        // Multi-range requests are not worth supporting for video playback.
        return if total == 0 {
            RangeOutcome::Unsatisfiable
        } else {
            RangeOutcome::Ignore
        };
    }

    let Some((start_s, end_s)) = spec.split_once('-') else {
        return RangeOutcome::Ignore;
    };

    match (start_s.is_empty(), end_s.is_empty()) {
        // bytes=-N → final N bytes
        (true, false) => match end_s.parse::<u64>() {
            Ok(0) => RangeOutcome::Unsatisfiable,
            Ok(n) => {
                let len = n.min(total);
                RangeOutcome::Satisfiable(total - len, total - 1)
            }
            Err(_) => RangeOutcome::Ignore,
        },
        // bytes=N- → from N to the end
        (false, true) => match start_s.parse::<u64>() {
            Ok(start) if start < total => RangeOutcome::Satisfiable(start, total - 1),
            Ok(_) => RangeOutcome::Unsatisfiable,
            Err(_) => RangeOutcome::Ignore,
        },
        // bytes=N-M
        (false, false) => match (start_s.parse::<u64>(), end_s.parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end && start < total => {
                RangeOutcome::Satisfiable(start, end.min(total - 1))
            }
            (Ok(_), Ok(_)) => RangeOutcome::Unsatisfiable,
            _ => RangeOutcome::Ignore,
        },
        (true, true) => RangeOutcome::Ignore,
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "mp4" | "m4v" => "video/mp4",
        "webm" | "mkv" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

fn inline_disposition(title: &str, extension: &str) -> String {
    let ascii_name: String = title
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect();
    let fallback = if ascii_name.is_empty() {
        "video"
    } else {
        &ascii_name
    };
    let full_name = format!("{}.{}", title, extension);
    let encoded = utf8_percent_encode(&full_name, NON_ALPHANUMERIC).to_string();

    format!(
        "inline; filename=\"{}.{}\"; filename*=UTF-8''{}",
        fallback, extension, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_bounded() {
        assert_eq!(parse_range("bytes=0-499", 1000), RangeOutcome::Satisfiable(0, 499));
        assert_eq!(parse_range("bytes=500-1999", 1000), RangeOutcome::Satisfiable(500, 999));
    }

    #[test]
    fn test_parse_range_open_ended() {
        assert_eq!(parse_range("bytes=200-", 1000), RangeOutcome::Satisfiable(200, 999));
        assert_eq!(parse_range("bytes=-100", 1000), RangeOutcome::Satisfiable(900, 999));
    }

    #[test]
    fn test_parse_range_out_of_bounds() {
        assert_eq!(parse_range("bytes=1000-", 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=2000-3000", 1000), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_malformed_is_ignored() {
        assert_eq!(parse_range("bytes=abc-def", 1000), RangeOutcome::Ignore);
        assert_eq!(parse_range("items=0-10", 1000), RangeOutcome::Ignore);
        assert_eq!(parse_range("bytes=0-10,20-30", 1000), RangeOutcome::Ignore);
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for("mp4"), "video/mp4");
        assert_eq!(content_type_for("webm"), "video/webm");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
