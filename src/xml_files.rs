//! The xmlfiles table: stored XML documents.
//!
//! Beyond the shared record format this service answers the pack
//! questions the rest of the system asks: which files a pack is manually
//! associated with, and whether a pack is referenced at all (the
//! deletion guard for packs).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::chunk::{Chunk, ChunkStore};
use crate::models::XmlFile;
use crate::records::{RecordFormat, RecordStore};

pub struct XmlFilesService {
    records: RecordStore<XmlFile>,
    chunks: Arc<ChunkStore>,
}

impl XmlFilesService {
    pub fn new(pool: SqlitePool, chunks: Arc<ChunkStore>) -> Self {
        Self {
            records: RecordStore::new(pool),
            chunks,
        }
    }

    /// Files manually associated with a pack, via the indexed `pack`
    /// column rather than by scanning serialized records.
    pub async fn get_by_pack(&self, pack_id: i64) -> Result<Vec<XmlFile>> {
        let rows = sqlx::query("SELECT id, data FROM xmlfiles WHERE pack = ? ORDER BY id")
            .bind(pack_id)
            .fetch_all(self.records.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let data: String = row.get("data");
                let mut record: XmlFile = serde_json::from_str(&data)?;
                record.id = Some(row.get("id"));
                Ok(record)
            })
            .collect()
    }

    /// Whether any file references the pack. Packs in use must not be
    /// deleted.
    pub async fn is_pack_used(&self, pack_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM xmlfiles WHERE pack = ?")
            .bind(pack_id)
            .fetch_one(self.records.pool())
            .await?;
        Ok(count > 0)
    }

    /// Record that the file was sent out, stamping `downloaded` with the
    /// current time.
    pub async fn mark_downloaded(&self, record: &XmlFile) -> Result<XmlFile> {
        let mut record = record.clone();
        record.downloaded = Some(Utc::now());
        self.records.update_record(&record).await
    }
}

#[async_trait]
impl RecordFormat for XmlFilesService {
    type Record = XmlFile;

    fn records(&self) -> &RecordStore<XmlFile> {
        &self.records
    }

    async fn make_record(&self, name: &str, data: String) -> Result<XmlFile> {
        let chunk = self.chunks.update_record(&Chunk::make(data).await?).await?;
        let mut record = XmlFile::new(name, chunk.id);
        record.uploaded = Some(Utc::now());
        Ok(record)
    }

    async fn get_download_data(&self, record: &XmlFile) -> Result<String> {
        self.chunks.chunk_data(&record.chunk).await
    }
}
