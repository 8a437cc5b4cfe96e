//! Content-addressed chunk storage.
//!
//! A [`Chunk`] is an immutable blob of text identified by the SHA-256
//! digest of its exact content: ingesting the same text twice always
//! yields the same id, no matter where the text came from. The
//! [`ChunkStore`] persists chunks under that id and enforces the
//! content-addressing integrity rule — a stored id can never be rebound
//! to different content.
//!
//! Chunks are never garbage collected. A chunk left behind by a deleted
//! record stays in the table until an explicit `clear`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::error::StoreError;

pub const CHUNK_RECORD_VERSION: i64 = 1;

/// Content handed to [`Chunk::make`]: either in-memory text or a file to
/// read. Callers holding a pending value await it before constructing.
#[derive(Debug, Clone)]
pub enum ChunkInput {
    Text(String),
    File(PathBuf),
}

impl From<String> for ChunkInput {
    fn from(text: String) -> Self {
        ChunkInput::Text(text)
    }
}

impl From<&str> for ChunkInput {
    fn from(text: &str) -> Self {
        ChunkInput::Text(text.to_string())
    }
}

impl From<PathBuf> for ChunkInput {
    fn from(path: PathBuf) -> Self {
        ChunkInput::File(path)
    }
}

/// An immutable, content-addressed blob of text.
///
/// The id is computed once, at construction, and never again. The dump
/// format inlines the content under the `file` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    #[serde(rename = "file")]
    content: String,
    pub record_version: i64,
}

impl Chunk {
    /// Build a chunk from raw input, reading file-backed input fully.
    ///
    /// The id is the lowercase hex SHA-256 of the content. The original
    /// file name plays no part in the digest.
    pub async fn make(input: impl Into<ChunkInput>) -> Result<Chunk> {
        let content = match input.into() {
            ChunkInput::Text(text) => text,
            ChunkInput::File(path) => tokio::fs::read_to_string(&path).await?,
        };
        Ok(Chunk::from_content(content))
    }

    pub(crate) fn from_content(content: String) -> Chunk {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let id = format!("{:x}", hasher.finalize());
        Chunk {
            id,
            content,
            record_version: CHUNK_RECORD_VERSION,
        }
    }

    /// The chunk's text content. Repeated calls return the same content.
    pub fn data(&self) -> &str {
        &self.content
    }
}

/// Persistent table of chunks, keyed by content digest.
pub struct ChunkStore {
    pool: SqlitePool,
    change: broadcast::Sender<()>,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (change, _) = broadcast::channel(16);
        Self { pool, change }
    }

    /// Subscribe to the change signal. One message is emitted after each
    /// committed insert or clear; idempotent re-writes emit nothing.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.change.subscribe()
    }

    fn notify(&self) {
        let _ = self.change.send(());
    }

    /// Persist a chunk.
    ///
    /// Inserting a new id stores the chunk and emits a change. Re-writing
    /// an id with identical content is a no-op returning the stored row.
    /// Re-writing an id with different content is a
    /// [`StoreError::ContentMismatch`] and leaves the stored content
    /// untouched.
    pub async fn update_record(&self, chunk: &Chunk) -> Result<Chunk> {
        let existing = sqlx::query("SELECT content, record_version FROM chunks WHERE id = ?")
            .bind(&chunk.id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            let content: String = row.get("content");
            if content != chunk.content {
                return Err(StoreError::ContentMismatch {
                    id: chunk.id.clone(),
                }
                .into());
            }
            return Ok(Chunk {
                id: chunk.id.clone(),
                content,
                record_version: row.get("record_version"),
            });
        }

        sqlx::query("INSERT INTO chunks (id, content, record_version) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(chunk.record_version)
            .execute(&self.pool)
            .await?;

        self.notify();
        Ok(chunk.clone())
    }

    pub async fn get_record_by_id(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT id, content, record_version FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Chunk {
            id: r.get("id"),
            content: r.get("content"),
            record_version: r.get("record_version"),
        }))
    }

    /// Dereference a chunk id to its content, failing if the chunk is gone.
    pub async fn chunk_data(&self, id: &str) -> Result<String> {
        let chunk = self
            .get_record_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing chunk: {id}"))?;
        Ok(chunk.content)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        self.notify();
        Ok(())
    }

    pub async fn get_record_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::io::Write;

    fn drain(rx: &mut broadcast::Receiver<()>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_same_content_same_id() {
        let a = Chunk::make("<doc/>").await.unwrap();
        let b = Chunk::make("<doc/>").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.data(), "<doc/>");
    }

    #[tokio::test]
    async fn test_different_content_different_id() {
        let a = Chunk::make("<doc/>").await.unwrap();
        let b = Chunk::make("<doc></doc>").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_file_name_does_not_affect_id() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("one.xml");
        let path_b = dir.path().join("two.xml");
        std::fs::File::create(&path_a)
            .unwrap()
            .write_all(b"<doc/>")
            .unwrap();
        std::fs::File::create(&path_b)
            .unwrap()
            .write_all(b"<doc/>")
            .unwrap();

        let a = Chunk::make(path_a).await.unwrap();
        let b = Chunk::make(path_b).await.unwrap();
        let c = Chunk::make("<doc/>").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let store = ChunkStore::new(test_pool().await);
        let mut rx = store.subscribe();

        let chunk = Chunk::make("payload").await.unwrap();
        store.update_record(&chunk).await.unwrap();
        assert_eq!(drain(&mut rx), 1);

        let again = store.update_record(&chunk).await.unwrap();
        assert_eq!(again.id, chunk.id);
        assert_eq!(store.get_record_count().await.unwrap(), 1);
        // the second write is a no-op and must not signal a change
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_content_mismatch_rejected() {
        let store = ChunkStore::new(test_pool().await);

        let chunk = Chunk::make("original").await.unwrap();
        store.update_record(&chunk).await.unwrap();

        let forged = Chunk {
            id: chunk.id.clone(),
            content: "tampered".to_string(),
            record_version: CHUNK_RECORD_VERSION,
        };
        let err = store.update_record(&forged).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::ContentMismatch {
                id: chunk.id.clone()
            })
        );

        // the stored content is untouched
        let stored = store.get_record_by_id(&chunk.id).await.unwrap().unwrap();
        assert_eq!(stored.data(), "original");
    }

    #[tokio::test]
    async fn test_clear_signals_change() {
        let store = ChunkStore::new(test_pool().await);
        store
            .update_record(&Chunk::make("x").await.unwrap())
            .await
            .unwrap();

        let mut rx = store.subscribe();
        store.clear().await.unwrap();
        assert_eq!(store.get_record_count().await.unwrap(), 0);
        assert_eq!(drain(&mut rx), 1);
    }
}
