pub mod chunk_store;
pub mod encoder;
pub mod media_service;
pub mod queue;
pub mod recording_service;
pub mod storage;
pub mod thumbnail_service;
pub mod transcode_service;
pub mod transcription;
pub mod transcript_service;
pub mod worker;
