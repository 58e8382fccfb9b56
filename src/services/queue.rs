use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::entities::{jobs, prelude::*};
use crate::services::encoder::tail;
use crate::services::transcode_service::TranscodeService;
use crate::services::transcript_service::TranscriptService;

/// Failure classification the orchestrator acts on: retryable failures burn
/// an attempt and go back on the queue, fatal ones terminate immediately.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Retryable(anyhow::Error),

    #[error("{0}")]
    Fatal(anyhow::Error),
}

impl TaskError {
    pub fn retryable<E: Into<anyhow::Error>>(e: E) -> Self {
        TaskError::Retryable(e.into())
    }

    pub fn fatal<E: Into<anyhow::Error>>(e: E) -> Self {
        TaskError::Fatal(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Convert,
    Transcribe,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Convert => jobs::KIND_CONVERT,
            JobKind::Transcribe => jobs::KIND_TRANSCRIBE,
        }
    }
}

/// Explicit message submission, constructor-injected into every component
/// that needs to schedule follow-up work.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, kind: JobKind, media_asset_id: &str) -> Result<()>;
}

pub struct DbJobQueue {
    db: DatabaseConnection,
    max_attempts: i32,
}

impl DbJobQueue {
    pub fn new(db: DatabaseConnection, max_attempts: i32) -> Self {
        Self { db, max_attempts }
    }
}

#[async_trait]
impl JobQueue for DbJobQueue {
    async fn enqueue(&self, kind: JobKind, media_asset_id: &str) -> Result<()> {
        let now = Utc::now();
        let job = jobs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            kind: Set(kind.as_str().to_string()),
            media_asset_id: Set(media_asset_id.to_string()),
            status: Set(jobs::STATUS_QUEUED.to_string()),
            attempts: Set(0),
            max_attempts: Set(self.max_attempts),
            run_at: Set(now.into()),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        job.insert(&self.db).await?;
        info!("Enqueued {} job for asset {}", kind.as_str(), media_asset_id);
        Ok(())
    }
}

/// Pulls due jobs off the shared queue and drives them to done or failed.
/// Several workers may run in parallel; the claim is an atomic
/// queued→running transition, and entity status writes stay
/// last-writer-wins by design.
pub struct JobWorker {
    db: DatabaseConnection,
    transcodes: Arc<TranscodeService>,
    transcripts: Arc<TranscriptService>,
    config: PipelineConfig,
}

impl JobWorker {
    pub fn new(
        db: DatabaseConnection,
        transcodes: Arc<TranscodeService>,
        transcripts: Arc<TranscriptService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            transcodes,
            transcripts,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Queue worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Queue worker shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(2)) => {
                    // Drain everything that is due before sleeping again.
                    loop {
                        match self.run_once().await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                error!("Queue worker poll failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and execute at most one due job. Returns whether one ran.
    pub async fn run_once(&self) -> Result<bool> {
        self.requeue_stuck().await?;

        let Some(job) = self.claim_next().await? else {
            return Ok(false);
        };
        self.execute(job).await;
        Ok(true)
    }

    /// A worker that crashed mid-job leaves the row `running` forever.
    /// Anything running well past the execution timeout goes back on the
    /// queue; the claim-time attempt counter keeps crash loops bounded.
    async fn requeue_stuck(&self) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.config.job_timeout_secs as i64)
            - chrono::Duration::seconds(120);

        let res = Jobs::update_many()
            .col_expr(jobs::Column::Status, Expr::value(jobs::STATUS_QUEUED))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(jobs::Column::Status.eq(jobs::STATUS_RUNNING))
            .filter(jobs::Column::UpdatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        if res.rows_affected > 0 {
            warn!("Requeued {} stuck running jobs", res.rows_affected);
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<jobs::Model>> {
        let candidates = Jobs::find()
            .filter(jobs::Column::Status.eq(jobs::STATUS_QUEUED))
            .filter(jobs::Column::RunAt.lte(Utc::now()))
            .order_by_asc(jobs::Column::RunAt)
            .limit(5)
            .all(&self.db)
            .await?;

        for candidate in candidates {
            // Atomic claim: only one worker wins the queued→running flip.
            let res = Jobs::update_many()
                .col_expr(jobs::Column::Status, Expr::value(jobs::STATUS_RUNNING))
                .col_expr(
                    jobs::Column::Attempts,
                    Expr::col(jobs::Column::Attempts).add(1),
                )
                .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(jobs::Column::Id.eq(&candidate.id))
                .filter(jobs::Column::Status.eq(jobs::STATUS_QUEUED))
                .exec(&self.db)
                .await?;

            if res.rows_affected == 1 {
                let claimed = Jobs::find_by_id(&candidate.id).one(&self.db).await?;
                return Ok(claimed);
            }
        }

        Ok(None)
    }

    async fn execute(&self, job: jobs::Model) {
        info!(
            "Executing {} job {} for asset {} (attempt {}/{})",
            job.kind, job.id, job.media_asset_id, job.attempts, job.max_attempts
        );

        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, self.dispatch(&job)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Retryable(anyhow::anyhow!(
                "job exceeded the {}s execution timeout",
                self.config.job_timeout_secs
            ))),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.finish(&job, jobs::STATUS_DONE, None).await {
                    error!("Failed to mark job {} done: {}", job.id, e);
                }
            }
            Err(TaskError::Retryable(cause)) if job.attempts < job.max_attempts => {
                let message = tail(&cause.to_string(), 500).to_string();
                warn!(
                    "Job {} attempt {} failed, retrying in {}s: {}",
                    job.id, job.attempts, self.config.job_retry_backoff_secs, message
                );
                if let Err(e) = self.requeue_with_backoff(&job, message).await {
                    error!("Failed to requeue job {}: {}", job.id, e);
                }
            }
            Err(err) => {
                let message = tail(&err.to_string(), 500).to_string();
                error!("Job {} terminally failed: {}", job.id, message);
                if let Err(e) = self.finish(&job, jobs::STATUS_FAILED, Some(message.clone())).await
                {
                    error!("Failed to mark job {} failed: {}", job.id, e);
                }
                // Persist the entity's terminal state so pollers never see a
                // permanently abandoned "processing".
                self.on_terminal_failure(&job, &message).await;
            }
        }
    }

    async fn dispatch(&self, job: &jobs::Model) -> Result<(), TaskError> {
        match job.kind.as_str() {
            jobs::KIND_CONVERT => self.transcodes.convert(&job.media_asset_id).await,
            jobs::KIND_TRANSCRIBE => self.transcripts.transcribe(&job.media_asset_id).await,
            other => Err(TaskError::Fatal(anyhow::anyhow!(
                "unknown job kind: {}",
                other
            ))),
        }
    }

    async fn on_terminal_failure(&self, job: &jobs::Model, message: &str) {
        let result = match job.kind.as_str() {
            jobs::KIND_CONVERT => {
                self.transcodes
                    .mark_failed(&job.media_asset_id, message)
                    .await
            }
            jobs::KIND_TRANSCRIBE => {
                self.transcripts
                    .mark_failed(&job.media_asset_id, message)
                    .await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(
                "Failed to persist terminal failure for asset {}: {}",
                job.media_asset_id, e
            );
        }
    }

    async fn requeue_with_backoff(&self, job: &jobs::Model, message: String) -> Result<()> {
        let run_at = Utc::now() + chrono::Duration::seconds(self.config.job_retry_backoff_secs as i64);
        let mut active: jobs::ActiveModel = job.clone().into();
        active.status = Set(jobs::STATUS_QUEUED.to_string());
        active.run_at = Set(run_at.into());
        active.last_error = Set(Some(message));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn finish(
        &self,
        job: &jobs::Model,
        status: &str,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut active: jobs::ActiveModel = job.clone().into();
        active.status = Set(status.to_string());
        active.last_error = Set(last_error);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;
        Ok(())
    }
}
