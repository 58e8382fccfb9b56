use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::entities::{media_assets, prelude::*, transcripts};
use crate::services::encoder::tail;
use crate::services::queue::{JobKind, JobQueue, TaskError};
use crate::services::storage::StorageService;
use crate::services::transcription::TranscriptionProvider;

/// A stored transcript segment. Ids are assigned sequentially here and stay
/// stable regardless of the provider's own numbering.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TranscriptSegment {
    pub id: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

pub struct TranscriptService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    provider: Arc<dyn TranscriptionProvider>,
    queue: Arc<dyn JobQueue>,
}

impl TranscriptService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        provider: Arc<dyn TranscriptionProvider>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            db,
            storage,
            provider,
            queue,
        }
    }

    /// Create the pending transcript row for an asset if it does not exist.
    pub async fn ensure_pending(&self, asset_id: &str) -> anyhow::Result<transcripts::Model> {
        if let Some(existing) = Transcripts::find()
            .filter(transcripts::Column::MediaAssetId.eq(asset_id))
            .one(&self.db)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let row = transcripts::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            media_asset_id: Set(asset_id.to_string()),
            status: Set(transcripts::STATUS_PENDING.to_string()),
            language: Set(None),
            full_text: Set(None),
            segments: Set(json!([])),
            error_message: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(row.insert(&self.db).await?)
    }

    /// Submit the asset's media to the speech-to-text provider and store the
    /// normalized result. Re-entry on retry is a no-op once completed.
    pub async fn transcribe(&self, asset_id: &str) -> Result<(), TaskError> {
        let Some(asset) = MediaAssets::find_by_id(asset_id)
            .one(&self.db)
            .await
            .map_err(TaskError::retryable)?
        else {
            info!("Asset {} vanished before transcription, skipping", asset_id);
            return Ok(());
        };

        let transcript = self
            .ensure_pending(asset_id)
            .await
            .map_err(TaskError::retryable)?;
        if transcript.status == transcripts::STATUS_COMPLETED {
            return Ok(());
        }

        self.set_status(&transcript.id, transcripts::STATUS_PROCESSING)
            .await
            .map_err(TaskError::retryable)?;

        let workdir = tempfile::tempdir().map_err(TaskError::retryable)?;
        let media = workdir
            .path()
            .join(format!("media.{}", asset.original_extension));
        self.storage
            .download_to_path(&asset.storage_key, &media)
            .await
            .map_err(TaskError::retryable)?;

        let file_name = format!("{}.{}", asset.id, asset.original_extension);
        let result = self
            .provider
            .transcribe(&media, &file_name)
            .await
            .map_err(TaskError::retryable)?;

        let segments = normalize_segments(&result.segments);
        let now = Utc::now();
        let mut active: transcripts::ActiveModel = transcript.into();
        active.status = Set(transcripts::STATUS_COMPLETED.to_string());
        active.language = Set(result.language);
        active.full_text = Set(Some(result.text));
        active.segments = Set(json!(segments));
        active.error_message = Set(None);
        active.updated_at = Set(now.into());
        active.update(&self.db).await.map_err(TaskError::retryable)?;

        info!("Asset {} transcribed ({} segments)", asset_id, segments.len());
        Ok(())
    }

    /// Terminal-failure handler invoked by the orchestrator.
    pub async fn mark_failed(&self, asset_id: &str, message: &str) -> anyhow::Result<()> {
        let Some(transcript) = Transcripts::find()
            .filter(transcripts::Column::MediaAssetId.eq(asset_id))
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };

        let mut active: transcripts::ActiveModel = transcript.into();
        active.status = Set(transcripts::STATUS_FAILED.to_string());
        active.error_message = Set(Some(tail(message, 500).to_string()));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn get_for_asset(
        &self,
        owner_id: &str,
        asset_id: &str,
    ) -> Result<transcripts::Model, AppError> {
        self.owned_asset(owner_id, asset_id).await?;

        Transcripts::find()
            .filter(transcripts::Column::MediaAssetId.eq(asset_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound(
                "No transcript exists for this video yet".to_string(),
            ))
    }

    /// User-triggered retry. Rejected while a submission is in flight so the
    /// same asset is never posted to the provider twice concurrently.
    pub async fn retry(
        &self,
        owner_id: &str,
        asset_id: &str,
    ) -> Result<transcripts::Model, AppError> {
        self.owned_asset(owner_id, asset_id).await?;

        let transcript = Transcripts::find()
            .filter(transcripts::Column::MediaAssetId.eq(asset_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound(
                "No transcript exists for this video yet".to_string(),
            ))?;

        if transcript.status == transcripts::STATUS_PROCESSING {
            return Err(AppError::Conflict(
                "Transcription is already in progress".to_string(),
            ));
        }

        let now = Utc::now();
        let mut active: transcripts::ActiveModel = transcript.into();
        active.status = Set(transcripts::STATUS_PENDING.to_string());
        active.error_message = Set(None);
        active.updated_at = Set(now.into());
        let updated = active.update(&self.db).await?;

        self.queue
            .enqueue(JobKind::Transcribe, asset_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(updated)
    }

    async fn owned_asset(
        &self,
        owner_id: &str,
        asset_id: &str,
    ) -> Result<media_assets::Model, AppError> {
        MediaAssets::find_by_id(asset_id)
            .filter(media_assets::Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Video not found".to_string()))
    }

    async fn set_status(&self, transcript_id: &str, status: &str) -> anyhow::Result<()> {
        let mut active = transcripts::ActiveModel {
            id: Set(transcript_id.to_string()),
            ..Default::default()
        };
        active.status = Set(status.to_string());
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }
}

/// Order provider segments by start time and assign stable sequential ids.
fn normalize_segments(
    raw: &[crate::services::transcription::ProviderSegment],
) -> Vec<TranscriptSegment> {
    let mut sorted: Vec<_> = raw
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, s)| TranscriptSegment {
            id: i as u32,
            start_seconds: s.start.max(0.0),
            end_seconds: s.end.max(s.start),
            text: s.text.trim().to_string(),
        })
        .collect()
}
