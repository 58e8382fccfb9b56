pub mod prelude;

pub mod jobs;
pub mod media_assets;
pub mod transcripts;
