pub use super::jobs::Entity as Jobs;
pub use super::media_assets::Entity as MediaAssets;
pub use super::transcripts::Entity as Transcripts;
