//! The metadata table: named mode-metadata blobs whose serialized form
//! lives in chunks. Structurally a twin of the schemas service.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::chunk::{Chunk, ChunkStore};
use crate::models::Metadata;
use crate::records::{RecordFormat, RecordStore};

pub struct MetadataService {
    records: RecordStore<Metadata>,
    chunks: Arc<ChunkStore>,
}

impl MetadataService {
    pub fn new(pool: SqlitePool, chunks: Arc<ChunkStore>) -> Self {
        Self {
            records: RecordStore::new(pool),
            chunks,
        }
    }
}

#[async_trait]
impl RecordFormat for MetadataService {
    type Record = Metadata;

    fn records(&self) -> &RecordStore<Metadata> {
        &self.records
    }

    async fn make_record(&self, name: &str, data: String) -> Result<Metadata> {
        let chunk = self.chunks.update_record(&Chunk::make(data).await?).await?;
        Ok(Metadata::new(name, chunk.id))
    }

    async fn get_download_data(&self, record: &Metadata) -> Result<String> {
        self.chunks.chunk_data(&record.chunk).await
    }
}
