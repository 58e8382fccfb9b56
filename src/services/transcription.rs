use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// One timestamped segment as returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    pub text: String,
}

/// The provider response shape the pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResult {
    pub language: Option<String>,
    pub text: String,
    #[serde(default)]
    pub segments: Vec<ProviderSegment>,
}

/// Boundary to the external speech-to-text service, swappable for a fake in
/// tests.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, media: &Path, file_name: &str) -> Result<TranscriptionResult>;
}

/// Whisper-compatible HTTP provider: posts the media as multipart form data
/// and requests segment-granularity timestamps.
pub struct HttpTranscriptionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriptionProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20 * 60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, media: &Path, file_name: &str) -> Result<TranscriptionResult> {
        let data = tokio::fs::read(media).await?;

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "transcription provider returned {}: {}",
                status,
                crate::services::encoder::tail(&body, 500)
            ));
        }

        Ok(response.json::<TranscriptionResult>().await?)
    }
}
