use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use rust_video_backend::config::PipelineConfig;
use rust_video_backend::infrastructure::database;
use rust_video_backend::services::chunk_store::ChunkStore;
use rust_video_backend::services::encoder::Encoder;
use rust_video_backend::services::media_service::MediaService;
use rust_video_backend::services::queue::{DbJobQueue, JobQueue, JobWorker};
use rust_video_backend::services::recording_service::RecordingService;
use rust_video_backend::services::storage::{ObjectMetadata, StorageService};
use rust_video_backend::services::thumbnail_service::ThumbnailService;
use rust_video_backend::services::transcode_service::TranscodeService;
use rust_video_backend::services::transcription::{
    ProviderSegment, TranscriptionProvider, TranscriptionResult,
};
use rust_video_backend::services::transcript_service::TranscriptService;
use rust_video_backend::AppState;
use sea_orm::{ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const JWT_SECRET: &str = "secret";

/// In-memory stand-in for the S3-backed storage trait.
pub struct MockStorageService {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.files.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn upload_from_path(&self, key: &str, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        self.files.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> Result<()> {
        let data = self
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.files.lock().unwrap().remove(key);
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        Ok(self.contains(key))
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))
    }

    async fn get_object_stream(&self, key: &str) -> Result<GetObjectOutput> {
        let data = self
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;
        Ok(GetObjectOutput::builder()
            .content_length(data.len() as i64)
            .body(ByteStream::from(data))
            .build())
    }

    async fn get_object_range(&self, key: &str, range: &str) -> Result<GetObjectOutput> {
        let data = self
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;

        let spec = range
            .strip_prefix("bytes=")
            .ok_or_else(|| anyhow::anyhow!("Bad range: {}", range))?;
        let (start_s, end_s) = spec
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Bad range: {}", range))?;
        let start: usize = start_s.parse()?;
        let end: usize = end_s.parse::<usize>()?.min(data.len() - 1);
        let slice = data[start..=end].to_vec();

        Ok(GetObjectOutput::builder()
            .content_length(slice.len() as i64)
            .body(ByteStream::from(slice))
            .build())
    }

    async fn get_object_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let data = self
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;
        Ok(ObjectMetadata {
            last_modified: None,
            size: data.len() as i64,
        })
    }
}

/// Fake encoder: no external binaries, deterministic outputs, switchable
/// failure modes. Records the conversion progress visible in the database at
/// each call so tests can assert what a poller would have observed.
pub struct FakeEncoder {
    pub db: DatabaseConnection,
    pub duration: f64,
    pub fail_transcode: AtomicBool,
    pub fail_trim: AtomicBool,
    pub observed_progress: Mutex<Vec<i32>>,
}

impl FakeEncoder {
    pub fn new(db: DatabaseConnection, duration: f64) -> Self {
        Self {
            db,
            duration,
            fail_transcode: AtomicBool::new(false),
            fail_trim: AtomicBool::new(false),
            observed_progress: Mutex::new(Vec::new()),
        }
    }

    async fn record_progress(&self) {
        use rust_video_backend::entities::prelude::MediaAssets;
        if let Ok(assets) = MediaAssets::find().all(&self.db).await {
            let mut observed = self.observed_progress.lock().unwrap();
            for asset in assets {
                observed.push(asset.conversion_progress);
            }
        }
    }

    fn write_png(path: &Path) -> Result<()> {
        let img = image::DynamicImage::new_rgb8(4, 4);
        let mut out = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )?;
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn probe_duration(&self, _input: &Path) -> Result<f64> {
        self.record_progress().await;
        Ok(self.duration)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        self.record_progress().await;
        if self.fail_transcode.load(Ordering::SeqCst) {
            anyhow::bail!("encoder exited with 1: moov atom not found");
        }
        let source = tokio::fs::read(input).await?;
        let mut converted = b"CONVERTED:".to_vec();
        converted.extend(source);
        tokio::fs::write(output, converted).await?;
        Ok(())
    }

    async fn extract_frame(&self, _input: &Path, output: &Path, _at_seconds: f64) -> Result<()> {
        Self::write_png(output)
    }

    async fn trim(&self, _input: &Path, output: &Path, start: f64, end: f64) -> Result<()> {
        if self.fail_trim.load(Ordering::SeqCst) {
            anyhow::bail!("encoder exited with 1: invalid seek window");
        }
        tokio::fs::write(output, format!("TRIMMED:{:.1}-{:.1}", start, end)).await?;
        Ok(())
    }
}

/// Fake speech-to-text provider with a switchable failure mode.
pub struct FakeTranscriptionProvider {
    pub fail: AtomicBool,
}

impl FakeTranscriptionProvider {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for FakeTranscriptionProvider {
    async fn transcribe(&self, _media: &Path, _file_name: &str) -> Result<TranscriptionResult> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("provider returned 503: overloaded");
        }
        Ok(TranscriptionResult {
            language: Some("en".to_string()),
            text: "hello world this is a demo".to_string(),
            segments: vec![
                ProviderSegment {
                    start: 0.0,
                    end: 4.0,
                    text: "hello world".to_string(),
                },
                ProviderSegment {
                    start: 4.0,
                    end: 8.0,
                    text: "this is a demo".to_string(),
                },
            ],
        })
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub db: DatabaseConnection,
    pub storage: Arc<MockStorageService>,
    pub encoder: Arc<FakeEncoder>,
    pub provider: Arc<FakeTranscriptionProvider>,
    pub worker: JobWorker,
    // Held so the chunk directory outlives the harness.
    pub _chunk_dir: tempfile::TempDir,
}

pub async fn setup() -> TestHarness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();

    let mut config = PipelineConfig::development();
    config.jwt_secret = JWT_SECRET.to_string();

    let chunk_dir = tempfile::tempdir().unwrap();
    let chunk_store = Arc::new(ChunkStore::new(chunk_dir.path().to_path_buf()));

    let storage = Arc::new(MockStorageService::new());
    let encoder = Arc::new(FakeEncoder::new(db.clone(), 10.0));
    let provider = Arc::new(FakeTranscriptionProvider::new());
    let queue: Arc<dyn JobQueue> = Arc::new(DbJobQueue::new(db.clone(), config.job_max_attempts));

    let thumbnails = Arc::new(ThumbnailService::new(
        db.clone(),
        storage.clone(),
        encoder.clone(),
        config.thumbnail_width,
    ));
    let transcripts = Arc::new(TranscriptService::new(
        db.clone(),
        storage.clone(),
        provider.clone(),
        queue.clone(),
    ));
    let transcodes = Arc::new(TranscodeService::new(
        db.clone(),
        storage.clone(),
        encoder.clone(),
        thumbnails.clone(),
        transcripts.clone(),
        queue.clone(),
        config.clone(),
    ));
    let recordings = Arc::new(RecordingService::new(
        db.clone(),
        storage.clone(),
        chunk_store.clone(),
        thumbnails.clone(),
        queue.clone(),
        config.clone(),
    ));
    let media = Arc::new(MediaService::new(db.clone(), storage.clone()));

    let worker = JobWorker::new(
        db.clone(),
        transcodes.clone(),
        transcripts.clone(),
        config.clone(),
    );

    let state = AppState {
        db: db.clone(),
        storage: storage.clone(),
        chunk_store,
        recordings,
        media,
        transcodes,
        transcripts,
        queue,
        config,
    };

    TestHarness {
        state,
        db,
        storage,
        encoder,
        provider,
        worker,
        _chunk_dir: chunk_dir,
    }
}

pub fn auth_token(owner_id: &str) -> String {
    rust_video_backend::utils::auth::create_jwt(owner_id, JWT_SECRET).unwrap()
}

pub async fn count_jobs(db: &DatabaseConnection, kind: &str) -> u64 {
    use rust_video_backend::entities::{jobs, prelude::Jobs};
    Jobs::find()
        .filter(jobs::Column::Kind.eq(kind))
        .all(db)
        .await
        .unwrap()
        .len() as u64
}

// ---- HTTP helpers -------------------------------------------------------

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

pub async fn api_json(
    app: Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

pub async fn api_put_bytes(
    app: Router,
    uri: &str,
    token: &str,
    body: Vec<u8>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/octet-stream")
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

pub async fn api_raw(
    app: Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}
