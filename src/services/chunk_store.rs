use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("recording session not found")]
    NotFound,

    #[error("recording session belongs to another user")]
    Unauthorized,

    #[error("upload is missing chunk {0}")]
    PartialUpload(u32),

    #[error("chunk storage failure: {0}")]
    Fatal(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub size: u64,
    pub received_at: DateTime<Utc>,
}

/// An in-progress chunked recording. Lives only in memory plus a
/// session-scoped directory of chunk files; a restart orphans both and the
/// periodic sweep reclaims the directory.
#[derive(Debug)]
pub struct ChunkSession {
    pub owner_id: String,
    pub title: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub chunks: BTreeMap<u32, ChunkMeta>,
}

impl ChunkSession {
    pub fn total_bytes(&self) -> u64 {
        self.chunks.values().map(|c| c.size).sum()
    }
}

#[derive(Serialize, ToSchema)]
pub struct AppendReceipt {
    pub received_chunks: usize,
    pub total_bytes: u64,
}

#[derive(Serialize, ToSchema)]
pub struct SessionStatus {
    pub session_id: String,
    pub title: String,
    pub mime_type: String,
    pub received_chunks: usize,
    pub total_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct AssembledChunk {
    pub index: u32,
    pub path: PathBuf,
    pub size: u64,
}

/// Everything the assembler needs: chunk files strictly ordered by index,
/// verified contiguous from 0 and present on disk.
pub struct AssemblyPlan {
    pub session_id: String,
    pub owner_id: String,
    pub title: String,
    pub mime_type: String,
    pub chunks: Vec<AssembledChunk>,
    pub total_bytes: u64,
}

pub struct ChunkStore {
    root: PathBuf,
    sessions: DashMap<String, ChunkSession>,
}

impl ChunkStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sessions: DashMap::new(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("chunk_{:06}.part", index))
    }

    fn check_owner(&self, session_id: &str, owner_id: &str) -> Result<(), ChunkStoreError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(ChunkStoreError::NotFound)?;
        if session.owner_id != owner_id {
            return Err(ChunkStoreError::Unauthorized);
        }
        Ok(())
    }

    pub async fn start_session(
        &self,
        owner_id: &str,
        title: &str,
        mime_type: &str,
    ) -> Result<String, ChunkStoreError> {
        let session_id = Uuid::new_v4().to_string();
        tokio::fs::create_dir_all(self.session_dir(&session_id)).await?;

        let now = Utc::now();
        self.sessions.insert(
            session_id.clone(),
            ChunkSession {
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                mime_type: mime_type.to_string(),
                created_at: now,
                last_activity: now,
                chunks: BTreeMap::new(),
            },
        );

        info!("Recording session {} started for {}", session_id, owner_id);
        Ok(session_id)
    }

    /// Persist one chunk. Replays of the same index overwrite the previous
    /// bytes, so a client retrying a lost acknowledgment cannot duplicate
    /// data. A disk failure aborts the whole session.
    pub async fn append_chunk(
        &self,
        owner_id: &str,
        session_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> Result<AppendReceipt, ChunkStoreError> {
        self.check_owner(session_id, owner_id)?;

        let path = self.chunk_path(session_id, index);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            warn!(
                "Chunk write failed for session {} index {}: {}, aborting session",
                session_id, index, e
            );
            self.discard(session_id).await;
            return Err(ChunkStoreError::Fatal(e));
        }

        // The session may have been cancelled while the write was in flight.
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(ChunkStoreError::NotFound)?;
        session.chunks.insert(
            index,
            ChunkMeta {
                size: bytes.len() as u64,
                received_at: Utc::now(),
            },
        );
        session.last_activity = Utc::now();

        Ok(AppendReceipt {
            received_chunks: session.chunks.len(),
            total_bytes: session.total_bytes(),
        })
    }

    pub fn session_status(
        &self,
        owner_id: &str,
        session_id: &str,
    ) -> Result<SessionStatus, ChunkStoreError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(ChunkStoreError::NotFound)?;
        if session.owner_id != owner_id {
            return Err(ChunkStoreError::Unauthorized);
        }

        Ok(SessionStatus {
            session_id: session_id.to_string(),
            title: session.title.clone(),
            mime_type: session.mime_type.clone(),
            received_chunks: session.chunks.len(),
            total_bytes: session.total_bytes(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    pub async fn cancel_session(
        &self,
        owner_id: &str,
        session_id: &str,
    ) -> Result<(), ChunkStoreError> {
        self.check_owner(session_id, owner_id)?;

        self.sessions.remove(session_id);
        tokio::fs::remove_dir_all(self.session_dir(session_id)).await?;
        info!("Recording session {} cancelled", session_id);
        Ok(())
    }

    /// Validate and order the session's chunks for assembly. Indices must be
    /// contiguous from 0 and every chunk file must still exist on disk; a gap
    /// fails the whole session rather than producing a truncated video.
    pub async fn begin_assembly(
        &self,
        owner_id: &str,
        session_id: &str,
    ) -> Result<AssemblyPlan, ChunkStoreError> {
        let (title, mime_type, indices) = {
            let session = self
                .sessions
                .get(session_id)
                .ok_or(ChunkStoreError::NotFound)?;
            if session.owner_id != owner_id {
                return Err(ChunkStoreError::Unauthorized);
            }
            let indices: Vec<(u32, u64)> =
                session.chunks.iter().map(|(i, m)| (*i, m.size)).collect();
            (session.title.clone(), session.mime_type.clone(), indices)
        };

        if indices.is_empty() {
            self.discard(session_id).await;
            return Err(ChunkStoreError::PartialUpload(0));
        }

        let mut chunks = Vec::with_capacity(indices.len());
        let mut total_bytes = 0u64;
        for (expected, (index, size)) in indices.into_iter().enumerate() {
            if index != expected as u32 {
                self.discard(session_id).await;
                return Err(ChunkStoreError::PartialUpload(expected as u32));
            }
            let path = self.chunk_path(session_id, index);
            if tokio::fs::metadata(&path).await.is_err() {
                self.discard(session_id).await;
                return Err(ChunkStoreError::PartialUpload(index));
            }
            total_bytes += size;
            chunks.push(AssembledChunk { index, path, size });
        }

        Ok(AssemblyPlan {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            title,
            mime_type,
            chunks,
            total_bytes,
        })
    }

    /// Drop a session and its chunk directory. Used after successful assembly
    /// and by the failure paths; removal errors are logged, not propagated.
    pub async fn discard(&self, session_id: &str) {
        self.sessions.remove(session_id);
        if let Err(e) = tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove chunk dir for {}: {}", session_id, e);
            }
        }
    }

    /// Remove sessions with no chunk activity past the staleness threshold.
    /// Returns the number of sessions swept.
    pub async fn sweep_stale(&self, max_idle: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let count = stale.len();
        for session_id in stale {
            info!("Sweeping orphaned recording session {}", session_id);
            self.discard(&session_id).await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_append_replay_overwrites() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();

        store.append_chunk("owner", &id, 0, &[b'a'; 500]).await.unwrap();
        let receipt = store.append_chunk("owner", &id, 0, &[b'b'; 300]).await.unwrap();

        assert_eq!(receipt.received_chunks, 1);
        assert_eq!(receipt.total_bytes, 300);

        let plan = store.begin_assembly("owner", &id).await.unwrap();
        let data = tokio::fs::read(&plan.chunks[0].path).await.unwrap();
        assert_eq!(data, vec![b'b'; 300]);
    }

    #[tokio::test]
    async fn test_out_of_order_arrival_assembles_by_index() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();

        store.append_chunk("owner", &id, 2, b"cc").await.unwrap();
        store.append_chunk("owner", &id, 0, b"aa").await.unwrap();
        store.append_chunk("owner", &id, 1, b"bb").await.unwrap();

        let plan = store.begin_assembly("owner", &id).await.unwrap();
        let indices: Vec<u32> = plan.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        let mut assembled = Vec::new();
        for chunk in &plan.chunks {
            assembled.extend(tokio::fs::read(&chunk.path).await.unwrap());
        }
        assert_eq!(assembled, b"aabbcc");
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_assembly() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();

        store.append_chunk("owner", &id, 0, b"aa").await.unwrap();
        store.append_chunk("owner", &id, 2, b"cc").await.unwrap();

        match store.begin_assembly("owner", &id).await {
            Err(ChunkStoreError::PartialUpload(1)) => {}
            other => panic!("expected PartialUpload(1), got {:?}", other.err()),
        }
        // The whole session is torn down, not left half-valid.
        assert!(matches!(
            store.session_status("owner", &id),
            Err(ChunkStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();

        assert!(matches!(
            store.append_chunk("intruder", &id, 0, b"xx").await,
            Err(ChunkStoreError::Unauthorized)
        ));
        assert!(matches!(
            store.cancel_session("intruder", &id).await,
            Err(ChunkStoreError::Unauthorized)
        ));
        assert!(matches!(
            store.session_status("intruder", &id),
            Err(ChunkStoreError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_cancel_removes_chunk_files() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();
        store.append_chunk("owner", &id, 0, b"aa").await.unwrap();

        let dir = store.session_dir(&id);
        assert!(dir.exists());

        store.cancel_session("owner", &id).await.unwrap();
        assert!(!dir.exists());
        assert!(matches!(
            store.session_status("owner", &id),
            Err(ChunkStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_sessions() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();
        store.append_chunk("owner", &id, 0, b"aa").await.unwrap();

        // Backdate the session past the staleness threshold.
        store
            .sessions
            .get_mut(&id)
            .unwrap()
            .last_activity = Utc::now() - chrono::Duration::hours(12);

        let swept = store.sweep_stale(chrono::Duration::hours(6)).await;
        assert_eq!(swept, 1);
        assert!(matches!(
            store.session_status("owner", &id),
            Err(ChunkStoreError::NotFound)
        ));
        assert!(!store.session_dir(&id).exists());
    }

    #[tokio::test]
    async fn test_fresh_session_survives_sweep() {
        let (_dir, store) = store();
        let id = store.start_session("owner", "Demo", "video/webm").await.unwrap();

        let swept = store.sweep_stale(chrono::Duration::hours(6)).await;
        assert_eq!(swept, 0);
        assert!(store.session_status("owner", &id).is_ok());
    }
}
