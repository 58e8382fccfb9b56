use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// How much trailing subprocess output is kept for diagnostics.
const DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// Adapter over the external encode/probe tooling so the pipeline logic can
/// be exercised against a fake without invoking real binaries.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Measure the container's duration in seconds.
    async fn probe_duration(&self, input: &Path) -> Result<f64>;

    /// Re-encode `input` into a seek-optimized MP4 at `output`.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;

    /// Extract a single frame at `at_seconds` into a PNG at `output`.
    async fn extract_frame(&self, input: &Path, output: &Path, at_seconds: f64) -> Result<()>;

    /// Re-encode only the `[start, end)` window of `input` into `output`.
    async fn trim(&self, input: &Path, output: &Path, start: f64, end: f64) -> Result<()>;
}

pub struct FfmpegEncoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: String, ffprobe: String) -> Self {
        Self { ffmpeg, ffprobe }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<String> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| anyhow!("failed to spawn {}: {}", program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                program,
                output.status,
                tail(&stderr, DIAGNOSTIC_TAIL_CHARS)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let stdout = self
            .run(
                &self.ffprobe,
                vec![
                    "-v".into(),
                    "error".into(),
                    "-show_entries".into(),
                    "format=duration".into(),
                    "-of".into(),
                    "default=noprint_wrappers=1:nokey=1".into(),
                    input.to_string_lossy().into_owned(),
                ],
            )
            .await?;

        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("unparseable duration from probe: {:?}", stdout.trim()))
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        // Single thread + fastest preset: trades compression ratio for low
        // memory and quick turnaround on small hosts.
        self.run(
            &self.ffmpeg,
            vec![
                "-y".into(),
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "ultrafast".into(),
                "-threads".into(),
                "1".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-c:a".into(),
                "aac".into(),
                "-movflags".into(),
                "+faststart".into(),
                output.to_string_lossy().into_owned(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn extract_frame(&self, input: &Path, output: &Path, at_seconds: f64) -> Result<()> {
        self.run(
            &self.ffmpeg,
            vec![
                "-y".into(),
                "-ss".into(),
                format!("{:.3}", at_seconds),
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-vframes".into(),
                "1".into(),
                output.to_string_lossy().into_owned(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn trim(&self, input: &Path, output: &Path, start: f64, end: f64) -> Result<()> {
        // Output-side seek keeps the cut frame-accurate.
        self.run(
            &self.ffmpeg,
            vec![
                "-y".into(),
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-ss".into(),
                format!("{:.3}", start),
                "-to".into(),
                format!("{:.3}", end),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "ultrafast".into(),
                "-threads".into(),
                "1".into(),
                "-c:a".into(),
                "aac".into(),
                "-movflags".into(),
                "+faststart".into(),
                output.to_string_lossy().into_owned(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Best-effort check for a seek-optimized MP4: does the moov atom appear in
/// the first bytes of the file? Only ever used to skip a redundant re-encode,
/// never as a correctness decision, since some container layouts will fool it.
pub async fn has_faststart(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut head = [0u8; 32];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return false,
        }
    }
    head[..filled].windows(4).any(|w| w == b"moov")
}

/// Last `n` characters of `s`, respecting char boundaries.
pub fn tail(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    let (idx, _) = s.char_indices().nth(skip).unwrap_or((0, ' '));
    &s[idx..]
}
