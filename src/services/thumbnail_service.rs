use anyhow::{Result, anyhow};
use image::ImageFormat;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::entities::media_assets;
use crate::services::encoder::Encoder;
use crate::services::storage::StorageService;

pub fn thumbnail_key(asset_id: &str) -> String {
    format!("thumbnails/{}.webp", asset_id)
}

/// Generates a single WebP preview frame per asset. Strictly best-effort: a
/// missing thumbnail is a degraded-but-acceptable state, so nothing here ever
/// propagates an error to the caller.
pub struct ThumbnailService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    encoder: Arc<dyn Encoder>,
    width: u32,
}

impl ThumbnailService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        encoder: Arc<dyn Encoder>,
        width: u32,
    ) -> Self {
        Self {
            db,
            storage,
            encoder,
            width,
        }
    }

    /// Fetch the asset's stored media and regenerate its thumbnail.
    pub async fn generate(&self, asset: &media_assets::Model) {
        let workdir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => {
                warn!("Thumbnail scratch dir failed for {}: {}", asset.id, e);
                return;
            }
        };
        let input = workdir
            .path()
            .join(format!("media.{}", asset.original_extension));
        if let Err(e) = self.storage.download_to_path(&asset.storage_key, &input).await {
            warn!("Thumbnail download failed for {}: {}", asset.id, e);
            return;
        }
        self.generate_from_file(asset, &input).await;
    }

    /// Regenerate the thumbnail from media already on local disk (the
    /// transcoder calls this to avoid a redundant download).
    pub async fn generate_from_file(&self, asset: &media_assets::Model, input: &Path) {
        if let Err(e) = self.try_generate(asset, input).await {
            warn!("Thumbnail generation failed for {}: {}", asset.id, e);
        }
    }

    async fn try_generate(&self, asset: &media_assets::Model, input: &Path) -> Result<()> {
        // Temporal midpoint, clamped to >= 1s to dodge black opening frames.
        let at = (asset.duration_seconds / 2.0).floor().max(1.0);

        let frame = tempfile::Builder::new().suffix(".png").tempfile()?;
        self.encoder.extract_frame(input, frame.path(), at).await?;

        let png_data = tokio::fs::read(frame.path()).await?;
        let img = image::load_from_memory(&png_data)
            .map_err(|e| anyhow!("failed to load extracted frame: {}", e))?;
        let thumb = img.thumbnail(self.width, self.width);
        let webp = encode_to_webp(&thumb)?;

        // Fixed key per asset: a fresh thumbnail replaces any prior one.
        self.storage
            .upload_file(&thumbnail_key(&asset.id), webp)
            .await?;

        if !asset.has_thumbnail {
            let mut active: media_assets::ActiveModel = asset.clone().into();
            active.has_thumbnail = Set(true);
            active.updated_at = Set(chrono::Utc::now().into());
            active.update(&self.db).await?;
        }

        info!("Thumbnail refreshed for {}", asset.id);
        Ok(())
    }
}

/// Encode a frame as 8-bit WebP; extracted frames can come out of the
/// decoder in deeper color formats WebP cannot represent.
fn encode_to_webp(img: &image::DynamicImage) -> Result<Vec<u8>> {
    let rgba = image::DynamicImage::ImageRgba8(img.to_rgba8());
    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    rgba.write_to(&mut cursor, ImageFormat::WebP)
        .map_err(|e| anyhow!("failed to encode WebP thumbnail: {}", e))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_key_is_stable() {
        assert_eq!(thumbnail_key("abc"), "thumbnails/abc.webp");
    }

    #[test]
    fn test_encode_to_webp_handles_rgb() {
        let img = image::DynamicImage::new_rgb8(4, 4);
        let webp = encode_to_webp(&img).unwrap();
        assert!(webp.starts_with(b"RIFF"));
    }
}
