use std::env;
use std::path::PathBuf;

/// Pipeline configuration for ingestion, transcoding and transcription
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum assembled upload size in bytes (default: 2 GB)
    pub max_upload_size: usize,

    /// Directory holding per-session chunk files (default: "./data/chunks")
    pub chunk_dir: PathBuf,

    /// Age after which an idle recording session is swept, in seconds (default: 6 h)
    pub session_stale_secs: u64,

    /// External encoder binary (default: "ffmpeg")
    pub ffmpeg_path: String,
    /// External probe binary (default: "ffprobe")
    pub ffprobe_path: String,

    /// Thumbnail width in pixels (default: 640)
    pub thumbnail_width: u32,

    /// Speech-to-text provider base URL (e.g. "https://api.openai.com/v1")
    pub transcriber_url: Option<String>,
    /// Speech-to-text provider API key
    pub transcriber_api_key: Option<String>,
    /// Speech-to-text model name (default: "whisper-1")
    pub transcriber_model: String,

    /// Attempt ceiling per background job (default: 3)
    pub job_max_attempts: i32,
    /// Fixed retry backoff in seconds (default: 60)
    pub job_retry_backoff_secs: u64,
    /// Per-job execution timeout in seconds (default: 30 min)
    pub job_timeout_secs: u64,
    /// Parallel queue workers (default: 2)
    pub worker_count: usize,

    /// Tolerance added to the declared duration when validating trim bounds
    pub trim_tolerance_secs: f64,

    /// JWT secret for validating tokens issued by the auth service
    pub jwt_secret: String,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 2 * 1024 * 1024 * 1024, // 2 GB
            chunk_dir: PathBuf::from("./data/chunks"),
            session_stale_secs: 6 * 3600,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            thumbnail_width: 640,
            transcriber_url: None,
            transcriber_api_key: None,
            transcriber_model: "whisper-1".to_string(),
            job_max_attempts: 3,
            job_retry_backoff_secs: 60,
            job_timeout_secs: 30 * 60,
            worker_count: 2,
            trim_tolerance_secs: 1.0,
            jwt_secret: "secret".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            chunk_dir: env::var("CHUNK_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.chunk_dir),

            session_stale_secs: env::var("SESSION_STALE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_stale_secs),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(default.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or(default.ffprobe_path),

            thumbnail_width: env::var("THUMBNAIL_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.thumbnail_width),

            transcriber_url: env::var("TRANSCRIBER_URL").ok(),
            transcriber_api_key: env::var("TRANSCRIBER_API_KEY").ok(),
            transcriber_model: env::var("TRANSCRIBER_MODEL").unwrap_or(default.transcriber_model),

            job_max_attempts: env::var("JOB_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.job_max_attempts),

            job_retry_backoff_secs: env::var("JOB_RETRY_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.job_retry_backoff_secs),

            job_timeout_secs: env::var("JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.job_timeout_secs),

            worker_count: env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.worker_count),

            trim_tolerance_secs: env::var("TRIM_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.trim_tolerance_secs),

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string()), // Fallback for dev convenience

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development and tests (small limits, fast retries)
    pub fn development() -> Self {
        Self {
            max_upload_size: 256 * 1024 * 1024,
            session_stale_secs: 3600,
            job_retry_backoff_secs: 1,
            job_timeout_secs: 60,
            worker_count: 1,
            ..Self::default()
        }
    }
}
