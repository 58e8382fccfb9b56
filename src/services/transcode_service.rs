use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::AppError;
use crate::config::PipelineConfig;
use crate::entities::{media_assets, prelude::*};
use crate::services::encoder::{Encoder, has_faststart, tail};
use crate::services::queue::{JobKind, JobQueue, TaskError};
use crate::services::storage::StorageService;
use crate::services::thumbnail_service::ThumbnailService;
use crate::services::transcript_service::TranscriptService;

/// Drives the conversion state machine: pending → processing (coarse
/// progress checkpoints) → completed | failed. Also owns the synchronous
/// trim operation, which reuses the same encoder adapter.
pub struct TranscodeService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    encoder: Arc<dyn Encoder>,
    thumbnails: Arc<ThumbnailService>,
    transcripts: Arc<TranscriptService>,
    queue: Arc<dyn JobQueue>,
    config: PipelineConfig,
}

impl TranscodeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        encoder: Arc<dyn Encoder>,
        thumbnails: Arc<ThumbnailService>,
        transcripts: Arc<TranscriptService>,
        queue: Arc<dyn JobQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            storage,
            encoder,
            thumbnails,
            transcripts,
            queue,
            config,
        }
    }

    /// Convert the asset's stored media into a seek-optimized MP4.
    /// Safe to re-enter on retry: an already-completed asset is a no-op.
    pub async fn convert(&self, asset_id: &str) -> Result<(), TaskError> {
        let Some(asset) = MediaAssets::find_by_id(asset_id)
            .one(&self.db)
            .await
            .map_err(TaskError::retryable)?
        else {
            // Deleted while queued; nothing left to convert.
            info!("Asset {} vanished before conversion, skipping", asset_id);
            return Ok(());
        };

        if asset.conversion_status == media_assets::STATUS_COMPLETED {
            return Ok(());
        }

        self.set_state(asset_id, media_assets::STATUS_PROCESSING, 10)
            .await
            .map_err(TaskError::retryable)?;

        let workdir = tempfile::tempdir().map_err(TaskError::retryable)?;
        let source = workdir
            .path()
            .join(format!("source.{}", asset.original_extension));
        self.storage
            .download_to_path(&asset.storage_key, &source)
            .await
            .map_err(TaskError::retryable)?;

        // The client-declared duration is not authoritative; re-measure.
        let duration = self
            .encoder
            .probe_duration(&source)
            .await
            .map_err(TaskError::retryable)?;
        self.set_progress(asset_id, 25)
            .await
            .map_err(TaskError::retryable)?;

        let converted = workdir.path().join("converted.mp4");
        let already_optimized =
            asset.original_extension == "mp4" && has_faststart(&source).await;
        if already_optimized {
            // Cheap header inspection only; when it is wrong we merely
            // re-encode or skip a re-encode of an equivalent file.
            info!("Asset {} already seek-optimized, skipping re-encode", asset_id);
            tokio::fs::copy(&source, &converted)
                .await
                .map_err(TaskError::retryable)?;
        } else {
            self.encoder
                .transcode(&source, &converted)
                .await
                .map_err(TaskError::retryable)?;
        }
        self.set_progress(asset_id, 60)
            .await
            .map_err(TaskError::retryable)?;

        let new_key = format!("videos/{}.mp4", asset.id);
        self.storage
            .upload_from_path(&new_key, &converted)
            .await
            .map_err(TaskError::retryable)?;
        if asset.storage_key != new_key {
            if let Err(e) = self.storage.delete_file(&asset.storage_key).await {
                warn!("Failed to discard pre-conversion media {}: {}", asset.storage_key, e);
            }
        }
        self.set_progress(asset_id, 95)
            .await
            .map_err(TaskError::retryable)?;

        let now = Utc::now();
        let mut active = media_assets::ActiveModel {
            id: Set(asset.id.clone()),
            ..Default::default()
        };
        active.storage_key = Set(new_key);
        active.original_extension = Set("mp4".to_string());
        active.duration_seconds = Set(duration);
        active.conversion_status = Set(media_assets::STATUS_COMPLETED.to_string());
        active.conversion_progress = Set(100);
        active.conversion_error = Set(None);
        active.converted_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&self.db).await.map_err(TaskError::retryable)?;

        let refreshed = MediaAssets::find_by_id(asset_id)
            .one(&self.db)
            .await
            .map_err(TaskError::retryable)?
            .ok_or_else(|| TaskError::fatal(anyhow::anyhow!("asset disappeared mid-conversion")))?;

        // A better thumbnail is now possible from the seekable source.
        self.thumbnails
            .generate_from_file(&refreshed, &converted)
            .await;

        // Transcript row is created alongside the transcription enqueue.
        self.transcripts
            .ensure_pending(asset_id)
            .await
            .map_err(TaskError::retryable)?;
        self.queue
            .enqueue(JobKind::Transcribe, asset_id)
            .await
            .map_err(TaskError::retryable)?;

        info!("Asset {} converted ({}s)", asset_id, duration);
        Ok(())
    }

    /// Terminal-failure handler invoked by the orchestrator once the attempt
    /// ceiling is exhausted.
    pub async fn mark_failed(&self, asset_id: &str, message: &str) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut active = media_assets::ActiveModel {
            id: Set(asset_id.to_string()),
            ..Default::default()
        };
        active.conversion_status = Set(media_assets::STATUS_FAILED.to_string());
        active.conversion_error = Set(Some(tail(message, 500).to_string()));
        active.updated_at = Set(now.into());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Explicit user-triggered retry of a terminally failed conversion.
    pub async fn retry(&self, owner_id: &str, asset_id: &str) -> Result<media_assets::Model, AppError> {
        let asset = MediaAssets::find_by_id(asset_id)
            .filter(media_assets::Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Video not found".to_string()))?;

        if asset.conversion_status != media_assets::STATUS_FAILED {
            return Err(AppError::Conflict(
                "Only failed conversions can be retried".to_string(),
            ));
        }

        let now = Utc::now();
        let mut active: media_assets::ActiveModel = asset.into();
        active.conversion_status = Set(media_assets::STATUS_PENDING.to_string());
        active.conversion_progress = Set(0);
        active.conversion_error = Set(None);
        active.updated_at = Set(now.into());
        let updated = active.update(&self.db).await?;

        self.queue
            .enqueue(JobKind::Convert, asset_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(updated)
    }

    /// Re-encode only the `[start, end)` window and swap it in. Validation
    /// happens before any media is touched, and a failing encode leaves the
    /// stored media exactly as it was.
    pub async fn trim(
        &self,
        owner_id: &str,
        asset_id: &str,
        start: f64,
        end: f64,
    ) -> Result<media_assets::Model, AppError> {
        let asset = MediaAssets::find_by_id(asset_id)
            .filter(media_assets::Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Video not found".to_string()))?;

        if start < 0.0 || end <= start {
            return Err(AppError::BadRequest(
                "End time must be greater than start time".to_string(),
            ));
        }
        if end > asset.duration_seconds + self.config.trim_tolerance_secs {
            return Err(AppError::BadRequest(
                "End time exceeds the video duration".to_string(),
            ));
        }
        if asset.conversion_status != media_assets::STATUS_COMPLETED {
            return Err(AppError::Conflict(
                "Video must finish converting before it can be trimmed".to_string(),
            ));
        }

        let workdir = tempfile::tempdir().map_err(|e| AppError::Internal(e.to_string()))?;
        let source = workdir
            .path()
            .join(format!("source.{}", asset.original_extension));
        self.storage
            .download_to_path(&asset.storage_key, &source)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let trimmed = workdir.path().join("trimmed.mp4");
        self.encoder
            .trim(&source, &trimmed, start, end)
            .await
            .map_err(|e| AppError::Internal(format!("Trim failed: {}", tail(&e.to_string(), 500))))?;

        self.replace_media(&asset, &trimmed, end - start).await
    }

    async fn replace_media(
        &self,
        asset: &media_assets::Model,
        new_media: &Path,
        new_duration: f64,
    ) -> Result<media_assets::Model, AppError> {
        self.storage
            .upload_from_path(&asset.storage_key, new_media)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let now = Utc::now();
        let mut active: media_assets::ActiveModel = asset.clone().into();
        active.duration_seconds = Set(new_duration);
        active.updated_at = Set(now.into());
        let updated = active.update(&self.db).await?;

        self.thumbnails.generate_from_file(&updated, new_media).await;
        info!("Asset {} trimmed to {:.1}s", asset.id, new_duration);
        Ok(updated)
    }

    async fn set_state(&self, asset_id: &str, status: &str, progress: i32) -> anyhow::Result<()> {
        let mut active = media_assets::ActiveModel {
            id: Set(asset_id.to_string()),
            ..Default::default()
        };
        active.conversion_status = Set(status.to_string());
        active.conversion_progress = Set(progress);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn set_progress(&self, asset_id: &str, progress: i32) -> anyhow::Result<()> {
        let mut active = media_assets::ActiveModel {
            id: Set(asset_id.to_string()),
            ..Default::default()
        };
        active.conversion_progress = Set(progress);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }
}
