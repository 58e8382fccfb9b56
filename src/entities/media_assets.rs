use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Conversion lifecycle values for `conversion_status`.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Client-declared at upload time, re-measured by the transcoder.
    pub duration_seconds: f64,
    pub original_extension: String,
    pub storage_key: String,
    pub has_thumbnail: bool,
    pub conversion_status: String,
    #[sea_orm(default_value = 0)]
    pub conversion_progress: i32,
    pub conversion_error: Option<String>,
    pub converted_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(unique)]
    pub share_token: String,
    pub is_public: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::transcripts::Entity")]
    Transcripts,
}

impl Related<super::transcripts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transcripts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
