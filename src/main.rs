use clap::Parser;
use dotenvy::dotenv;
use rust_video_backend::config::PipelineConfig;
use rust_video_backend::infrastructure::{database, storage};
use rust_video_backend::services::chunk_store::ChunkStore;
use rust_video_backend::services::encoder::FfmpegEncoder;
use rust_video_backend::services::media_service::MediaService;
use rust_video_backend::services::queue::{DbJobQueue, JobQueue, JobWorker};
use rust_video_backend::services::recording_service::RecordingService;
use rust_video_backend::services::thumbnail_service::ThumbnailService;
use rust_video_backend::services::transcode_service::TranscodeService;
use rust_video_backend::services::transcript_service::TranscriptService;
use rust_video_backend::services::transcription::{HttpTranscriptionProvider, TranscriptionProvider};
use rust_video_backend::services::worker::BackgroundWorker;
use rust_video_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_video_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Rust Video Backend [Mode: {}]...", args.mode);

    // 2. Setup Common Infrastructure
    let db = database::setup_database().await?;
    let storage_service = storage::setup_storage().await;
    let config = PipelineConfig::from_env();
    info!(
        "🎬 Pipeline Config: Max Upload={}MB, Workers={}, Attempts={}, Backoff={}s",
        config.max_upload_size / 1024 / 1024,
        config.worker_count,
        config.job_max_attempts,
        config.job_retry_backoff_secs
    );

    // 3. Wire the pipeline components
    let chunk_store = Arc::new(ChunkStore::new(config.chunk_dir.clone()));
    let encoder = Arc::new(FfmpegEncoder::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
    ));
    let queue: Arc<dyn JobQueue> =
        Arc::new(DbJobQueue::new(db.clone(), config.job_max_attempts));

    let provider: Arc<dyn TranscriptionProvider> = match &config.transcriber_url {
        Some(url) => Arc::new(HttpTranscriptionProvider::new(
            url.clone(),
            config.transcriber_api_key.clone(),
            config.transcriber_model.clone(),
        )?),
        None => {
            anyhow::bail!("TRANSCRIBER_URL must be set");
        }
    };

    let thumbnails = Arc::new(ThumbnailService::new(
        db.clone(),
        storage_service.clone(),
        encoder.clone(),
        config.thumbnail_width,
    ));
    let transcripts = Arc::new(TranscriptService::new(
        db.clone(),
        storage_service.clone(),
        provider,
        queue.clone(),
    ));
    let transcodes = Arc::new(TranscodeService::new(
        db.clone(),
        storage_service.clone(),
        encoder,
        thumbnails.clone(),
        transcripts.clone(),
        queue.clone(),
        config.clone(),
    ));
    let recordings = Arc::new(RecordingService::new(
        db.clone(),
        storage_service.clone(),
        chunk_store.clone(),
        thumbnails.clone(),
        queue.clone(),
        config.clone(),
    ));
    let media = Arc::new(MediaService::new(db.clone(), storage_service.clone()));

    // 4. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 5. Initialize Worker Services
    if args.mode == "worker" || args.mode == "all" {
        for i in 0..config.worker_count {
            let worker = JobWorker::new(
                db.clone(),
                transcodes.clone(),
                transcripts.clone(),
                config.clone(),
            );
            let worker_shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker.run(worker_shutdown).await;
            }));
            info!("👷 Queue worker {} initialized.", i + 1);
        }

        let sweeper = BackgroundWorker::new(
            db.clone(),
            chunk_store.clone(),
            config.clone(),
            shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(async move {
            sweeper.run().await;
        }));
        info!("🧹 Session sweeper initialized.");
    }

    // 6. Initialize API Service
    if args.mode == "api" || args.mode == "all" {
        let state = AppState {
            db: db.clone(),
            storage: storage_service.clone(),
            chunk_store,
            recordings,
            media,
            transcodes,
            transcripts,
            queue,
            config: config.clone(),
        };

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!(
            "📖 Swagger UI documentation: http://localhost:{}/swagger-ui",
            args.port
        );

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        });
        handles.push(server_handle);
    }

    // 7. Wait for Shutdown Signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down backend services...");
    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
