//! The schemas table: named grammars whose text lives in chunks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::chunk::{Chunk, ChunkStore};
use crate::models::Schema;
use crate::records::{RecordFormat, RecordStore};

pub struct SchemasService {
    records: RecordStore<Schema>,
    chunks: Arc<ChunkStore>,
}

impl SchemasService {
    pub fn new(pool: SqlitePool, chunks: Arc<ChunkStore>) -> Self {
        Self {
            records: RecordStore::new(pool),
            chunks,
        }
    }
}

#[async_trait]
impl RecordFormat for SchemasService {
    type Record = Schema;

    fn records(&self) -> &RecordStore<Schema> {
        &self.records
    }

    async fn make_record(&self, name: &str, data: String) -> Result<Schema> {
        let chunk = self.chunks.update_record(&Chunk::make(data).await?).await?;
        Ok(Schema::new(name, chunk.id))
    }

    async fn get_download_data(&self, record: &Schema) -> Result<String> {
        self.chunks.chunk_data(&record.chunk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::PresetConfirmer;
    use crate::db::test_pool;

    async fn service() -> SchemasService {
        let pool = test_pool().await;
        SchemasService::new(pool.clone(), Arc::new(ChunkStore::new(pool)))
    }

    #[tokio::test]
    async fn test_download_returns_original_text() {
        let svc = service().await;
        let saved = svc
            .save_new_record("doc.rng", "<grammar/>".to_string())
            .await
            .unwrap();
        assert_eq!(svc.get_download_data(&saved).await.unwrap(), "<grammar/>");
    }

    #[tokio::test]
    async fn test_same_text_shares_one_chunk() {
        let svc = service().await;
        let a = svc
            .save_new_record("a.rng", "<grammar/>".to_string())
            .await
            .unwrap();
        let b = svc
            .save_new_record("b.rng", "<grammar/>".to_string())
            .await
            .unwrap();
        assert_eq!(a.chunk, b.chunk);
        assert_eq!(svc.chunks.get_record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_check_decides_without_writing() {
        let svc = service().await;
        let saved = svc
            .save_new_record("doc.rng", "<grammar/>".to_string())
            .await
            .unwrap();

        // a free name never consults the confirmer
        let free = svc
            .write_check("other.rng", &PresetConfirmer::no())
            .await
            .unwrap();
        assert!(free.write);
        assert!(free.record.is_none());

        let declined = svc
            .write_check("doc.rng", &PresetConfirmer::no())
            .await
            .unwrap();
        assert!(!declined.write);
        assert_eq!(declined.record.as_ref().unwrap().id, saved.id);
        // deciding wrote nothing
        assert_eq!(svc.records().get_record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_safe_load_declined_leaves_record_alone() {
        let svc = service().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.rng");
        tokio::fs::write(&path, "<old/>").await.unwrap();
        svc.safe_load_from_file(&path, &PresetConfirmer::yes())
            .await
            .unwrap();

        tokio::fs::write(&path, "<new/>").await.unwrap();
        let declined = svc
            .safe_load_from_file(&path, &PresetConfirmer::no())
            .await
            .unwrap();
        assert!(declined.is_none());

        let kept = svc
            .records()
            .get_record_by_name("doc.rng")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(svc.get_download_data(&kept).await.unwrap(), "<old/>");
    }
}
