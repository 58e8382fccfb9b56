pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::chunk_store::ChunkStore;
use crate::services::media_service::MediaService;
use crate::services::queue::JobQueue;
use crate::services::recording_service::RecordingService;
use crate::services::storage::StorageService;
use crate::services::transcode_service::TranscodeService;
use crate::services::transcript_service::TranscriptService;
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Per-chunk request body ceiling; recorders send a few MB per chunk.
const MAX_CHUNK_BODY: usize = 64 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::recordings::start_recording,
        api::handlers::recordings::append_chunk,
        api::handlers::recordings::session_status,
        api::handlers::recordings::complete_recording,
        api::handlers::recordings::cancel_recording,
        api::handlers::videos::list_videos,
        api::handlers::videos::get_video,
        api::handlers::videos::update_video,
        api::handlers::videos::delete_video,
        api::handlers::videos::conversion_status,
        api::handlers::videos::retry_conversion,
        api::handlers::videos::trim_video,
        api::handlers::videos::update_sharing,
        api::handlers::videos::stream_video,
        api::handlers::videos::get_thumbnail,
        api::handlers::videos::watch_video,
        api::handlers::videos::watch_stream,
        api::handlers::videos::watch_thumbnail,
        api::handlers::transcripts::get_transcript,
        api::handlers::transcripts::retry_transcript,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::recordings::StartRecordingRequest,
            api::handlers::recordings::StartRecordingResponse,
            api::handlers::recordings::CompleteRecordingRequest,
            api::handlers::videos::VideoResponse,
            api::handlers::videos::ConversionStatusResponse,
            api::handlers::videos::WatchResponse,
            api::handlers::videos::UpdateVideoRequest,
            api::handlers::videos::TrimRequest,
            api::handlers::videos::ShareRequest,
            api::handlers::transcripts::TranscriptResponse,
            services::chunk_store::AppendReceipt,
            services::chunk_store::SessionStatus,
            services::transcript_service::TranscriptSegment,
        )
    ),
    tags(
        (name = "recordings", description = "Chunked recording sessions"),
        (name = "videos", description = "Video assets and processing status"),
        (name = "watch", description = "Public share-token access")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub chunk_store: Arc<ChunkStore>,
    pub recordings: Arc<RecordingService>,
    pub media: Arc<MediaService>,
    pub transcodes: Arc<TranscodeService>,
    pub transcripts: Arc<TranscriptService>,
    pub queue: Arc<dyn JobQueue>,
    pub config: PipelineConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .route(
            "/recordings",
            post(api::handlers::recordings::start_recording).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/recordings/:session_id",
            get(api::handlers::recordings::session_status)
                .delete(api::handlers::recordings::cancel_recording)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/recordings/:session_id/chunks/:index",
            put(api::handlers::recordings::append_chunk)
                .layer(axum::extract::DefaultBodyLimit::max(MAX_CHUNK_BODY))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/recordings/:session_id/complete",
            post(api::handlers::recordings::complete_recording).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos",
            get(api::handlers::videos::list_videos).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id",
            get(api::handlers::videos::get_video)
                .patch(api::handlers::videos::update_video)
                .delete(api::handlers::videos::delete_video)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/videos/:id/status",
            get(api::handlers::videos::conversion_status).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/retry",
            post(api::handlers::videos::retry_conversion).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/trim",
            post(api::handlers::videos::trim_video).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/share",
            post(api::handlers::videos::update_sharing).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/stream",
            get(api::handlers::videos::stream_video).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/thumbnail",
            get(api::handlers::videos::get_thumbnail).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/transcript",
            get(api::handlers::transcripts::get_transcript).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/videos/:id/transcript/retry",
            post(api::handlers::transcripts::retry_transcript).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        // Share-token routes are public by design; the token is the secret.
        .route("/watch/:share_token", get(api::handlers::videos::watch_video))
        .route(
            "/watch/:share_token/stream",
            get(api::handlers::videos::watch_stream),
        )
        .route(
            "/watch/:share_token/thumbnail",
            get(api::handlers::videos::watch_thumbnail),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
