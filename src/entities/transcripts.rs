use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Transcription lifecycle values for `status`.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transcripts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub media_asset_id: String,
    pub status: String,
    pub language: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub full_text: Option<String>,
    /// Ordered `{id, start_seconds, end_seconds, text}` objects.
    #[sea_orm(column_type = "JsonBinary")]
    pub segments: Json,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::media_assets::Entity",
        from = "Column::MediaAssetId",
        to = "super::media_assets::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    MediaAssets,
}

impl Related<super::media_assets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MediaAssets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
