use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::config::PipelineConfig;
use crate::entities::media_assets;
use crate::services::chunk_store::ChunkStore;
use crate::services::queue::{JobKind, JobQueue};
use crate::services::storage::StorageService;
use crate::services::thumbnail_service::ThumbnailService;
use crate::utils::token::generate_share_token;

/// Turns a finished recording session into a durable media asset: orders and
/// concatenates the chunk files, uploads the raw container, and hands the
/// asset to the conversion queue.
pub struct RecordingService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    chunk_store: Arc<ChunkStore>,
    thumbnails: Arc<ThumbnailService>,
    queue: Arc<dyn JobQueue>,
    config: PipelineConfig,
}

impl RecordingService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        chunk_store: Arc<ChunkStore>,
        thumbnails: Arc<ThumbnailService>,
        queue: Arc<dyn JobQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            storage,
            chunk_store,
            thumbnails,
            queue,
            config,
        }
    }

    pub async fn complete_session(
        &self,
        owner_id: &str,
        session_id: &str,
        declared_duration: f64,
        description: Option<String>,
    ) -> Result<media_assets::Model, AppError> {
        if !declared_duration.is_finite() || declared_duration < 0.0 {
            return Err(AppError::BadRequest("Invalid declared duration".to_string()));
        }

        let plan = self.chunk_store.begin_assembly(owner_id, session_id).await?;

        if plan.total_bytes as usize > self.config.max_upload_size {
            self.chunk_store.discard(session_id).await;
            return Err(AppError::PayloadTooLarge(format!(
                "Recording exceeds the {} byte upload limit",
                self.config.max_upload_size
            )));
        }

        // Concatenate strictly by index with no added framing; the client
        // chunked one continuous container, so raw concatenation is valid.
        let workdir = tempfile::tempdir().map_err(|e| AppError::Internal(e.to_string()))?;
        let assembled_path = workdir.path().join("assembled.bin");
        let mut assembled = tokio::fs::File::create(&assembled_path)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        for chunk in &plan.chunks {
            let mut part = tokio::fs::File::open(&chunk.path)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            tokio::io::copy(&mut part, &mut assembled)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
        }
        assembled
            .flush()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        drop(assembled);

        let extension = detect_extension(&assembled_path, &plan.mime_type).await;

        let asset_id = Uuid::new_v4().to_string();
        let storage_key = format!("videos/{}.{}", asset_id, extension);
        self.storage
            .upload_from_path(&storage_key, &assembled_path)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let now = Utc::now();
        let asset = media_assets::ActiveModel {
            id: Set(asset_id.clone()),
            owner_id: Set(owner_id.to_string()),
            title: Set(plan.title.clone()),
            description: Set(description),
            duration_seconds: Set(declared_duration),
            original_extension: Set(extension.to_string()),
            storage_key: Set(storage_key),
            has_thumbnail: Set(false),
            conversion_status: Set(media_assets::STATUS_PENDING.to_string()),
            conversion_progress: Set(0),
            conversion_error: Set(None),
            converted_at: Set(None),
            share_token: Set(generate_share_token()),
            is_public: Set(false),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        let asset = asset.insert(&self.db).await?;

        // First preview straight off the raw upload; refreshed again once
        // the transcoder produces a seekable source.
        self.thumbnails
            .generate_from_file(&asset, &assembled_path)
            .await;

        self.chunk_store.discard(session_id).await;

        self.queue
            .enqueue(JobKind::Convert, &asset.id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        info!(
            "Session {} assembled into asset {} ({} bytes, {} chunks)",
            session_id,
            asset.id,
            plan.total_bytes,
            plan.chunks.len()
        );

        // Re-read: the thumbnail pass may have flipped has_thumbnail.
        use sea_orm::EntityTrait;
        let refreshed = crate::entities::prelude::MediaAssets::find_by_id(&asset.id)
            .one(&self.db)
            .await?
            .unwrap_or(asset);
        Ok(refreshed)
    }
}

/// Sniff the assembled container, falling back to the declared mime type.
async fn detect_extension(path: &std::path::Path, declared_mime: &str) -> &'static str {
    if let Ok(head) = read_head(path, 8192).await {
        if let Some(kind) = infer::get(&head) {
            if kind.mime_type().starts_with("video/") || kind.mime_type().starts_with("audio/") {
                return match kind.extension() {
                    "mp4" => "mp4",
                    "webm" | "mkv" => "webm",
                    "mov" => "mov",
                    "avi" => "avi",
                    _ => extension_for_mime(declared_mime),
                };
            }
        }
    }
    extension_for_mime(declared_mime)
}

async fn read_head(path: &std::path::Path, limit: usize) -> std::io::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-msvideo" | "video/avi" => "avi",
        "video/x-matroska" => "webm",
        // MediaRecorder default; also the safe fallback for unknown types.
        _ => "webm",
    }
}
