use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::config::PipelineConfig;
use crate::entities::{jobs, prelude::*};
use crate::services::chunk_store::ChunkStore;

/// Retention window for finished job rows.
const JOB_RETENTION_DAYS: i64 = 7;

/// Periodic housekeeping: sweeps orphaned recording sessions (client
/// disconnected mid-capture) and prunes old finished job rows.
pub struct BackgroundWorker {
    db: DatabaseConnection,
    chunk_store: Arc<ChunkStore>,
    config: PipelineConfig,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        db: DatabaseConnection,
        chunk_store: Arc<ChunkStore>,
        config: PipelineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            chunk_store,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(600)) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        tracing::info!("🧹 Running background cleanup tasks...");

        // 1. Sweep abandoned recording sessions
        let stale = chrono::Duration::seconds(self.config.session_stale_secs as i64);
        let swept = self.chunk_store.sweep_stale(stale).await;
        if swept > 0 {
            tracing::info!("Swept {} orphaned recording sessions", swept);
        }

        // 2. Prune finished job rows past retention
        let cutoff = Utc::now() - chrono::Duration::days(JOB_RETENTION_DAYS);
        let result = Jobs::delete_many()
            .filter(jobs::Column::Status.is_in([jobs::STATUS_DONE, jobs::STATUS_FAILED]))
            .filter(jobs::Column::UpdatedAt.lt(cutoff))
            .exec(&self.db)
            .await;
        match result {
            Ok(res) if res.rows_affected > 0 => {
                tracing::info!("Pruned {} finished job rows", res.rows_affected);
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Job pruning failed: {}", e),
        }

        tracing::info!("✅ Background cleanup completed");
    }
}
