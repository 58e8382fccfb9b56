use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::AppError;
use crate::entities::{jobs, media_assets, prelude::*, transcripts};
use crate::services::storage::StorageService;
use crate::services::thumbnail_service::thumbnail_key;
use crate::utils::token::generate_share_token;

/// Owner-scoped reads and mutations of media assets, plus the public
/// share-token lookup.
pub struct MediaService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
}

impl MediaService {
    pub fn new(db: DatabaseConnection, storage: Arc<dyn StorageService>) -> Self {
        Self { db, storage }
    }

    pub async fn get_owned(
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

    pub async fn list_owned(&self, owner_id: &str) -> Result<Vec<media_assets::Model>, AppError> {
        Ok(MediaAssets::find()
            .filter(media_assets::Column::OwnerId.eq(owner_id))
            .order_by_desc(media_assets::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Public access path: valid share token AND the owner has published it.
    pub async fn find_public_by_token(
        &self,
        share_token: &str,
    ) -> Result<media_assets::Model, AppError> {
        MediaAssets::find()
            .filter(media_assets::Column::ShareToken.eq(share_token))
            .filter(media_assets::Column::IsPublic.eq(true))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound("Video not found".to_string()))
    }

    pub async fn update_details(
        &self,
        owner_id: &str,
        asset_id: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<media_assets::Model, AppError> {
        let asset = self.get_owned(owner_id, asset_id).await?;

        let mut active: media_assets::ActiveModel = asset.into();
        if let Some(title) = title {
            active.title = Set(title);
        }
        if description.is_some() {
            active.description = Set(description);
        }
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&self.db).await?)
    }

    /// Update visibility and optionally rotate the share token, instantly
    /// invalidating previously shared links.
    pub async fn update_sharing(
        &self,
        owner_id: &str,
        asset_id: &str,
        is_public: Option<bool>,
        rotate_token: bool,
    ) -> Result<media_assets::Model, AppError> {
        let asset = self.get_owned(owner_id, asset_id).await?;

        let mut active: media_assets::ActiveModel = asset.into();
        if let Some(is_public) = is_public {
            active.is_public = Set(is_public);
        }
        if rotate_token {
            active.share_token = Set(generate_share_token());
        }
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&self.db).await?)
    }

    /// Delete the asset and everything derived from it: stored media,
    /// thumbnail, transcript and any queued jobs.
    pub async fn delete(&self, owner_id: &str, asset_id: &str) -> Result<(), AppError> {
        let asset = self.get_owned(owner_id, asset_id).await?;

        if let Err(e) = self.storage.delete_file(&asset.storage_key).await {
            warn!("Failed to delete media blob {}: {}", asset.storage_key, e);
        }
        if asset.has_thumbnail {
            if let Err(e) = self.storage.delete_file(&thumbnail_key(&asset.id)).await {
                warn!("Failed to delete thumbnail for {}: {}", asset.id, e);
            }
        }

        Transcripts::delete_many()
            .filter(transcripts::Column::MediaAssetId.eq(asset_id))
            .exec(&self.db)
            .await?;
        Jobs::delete_many()
            .filter(jobs::Column::MediaAssetId.eq(asset_id))
            .exec(&self.db)
            .await?;

        asset.delete(&self.db).await?;
        info!("Deleted asset {} for {}", asset_id, owner_id);
        Ok(())
    }
}
