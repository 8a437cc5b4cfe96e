//! The packs table and the top-element matching engine.
//!
//! A pack bundles a schema, optional metadata, and an editing mode, and
//! declares when it applies to a document via its match rule. An explicit
//! rule names one `{namespace}local` pair. An automatic rule (empty pair)
//! derives its pairs from the schema grammar's possible root elements;
//! roots whose name class is ambiguous contribute nothing.
//!
//! Matching runs against a derived table built lazily from all packs and
//! cached until any pack changes. Invalidation is synchronous with the
//! mutation: a lookup issued right after a pack write always sees the
//! new state. When two packs claim the same pair, the one with the
//! larger id wins.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, watch, Mutex};

use crate::chunk::{Chunk, ChunkStore};
use crate::error::StoreError;
use crate::grammar::GrammarIntrospector;
use crate::models::{MatchSpecification, Pack};
use crate::records::{RecordFormat, RecordStore};

pub const PACK_INTERCHANGE_VERSION: i64 = 1;

/// The transportable form of a pack. Unlike the stored record, `schema`
/// and `metadata` carry the full text instead of chunk ids.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackInterchange {
    interchange_version: i64,
    name: String,
    schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
    mode: String,
    #[serde(rename = "match", default)]
    match_spec: MatchSpecification,
}

type MatchingTable = Arc<HashMap<String, i64>>;

/// Cached derived state: the match-key table plus an epoch counter that
/// detects builds overtaken by a concurrent invalidation.
#[derive(Default)]
struct MatchingCache {
    inner: std::sync::Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    epoch: u64,
    table: Option<MatchingTable>,
}

impl MatchingCache {
    fn invalidate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        inner.table = None;
    }

    /// Current table, if any, plus the epoch it belongs to.
    fn snapshot(&self) -> (u64, Option<MatchingTable>) {
        let inner = self.inner.lock().unwrap();
        (inner.epoch, inner.table.clone())
    }

    /// Install a freshly built table unless an invalidation ran since the
    /// build started.
    fn install(&self, epoch: u64, table: MatchingTable) {
        let mut inner = self.inner.lock().unwrap();
        if inner.epoch == epoch {
            inner.table = Some(table);
        }
    }
}

pub struct PacksService {
    records: RecordStore<Pack>,
    chunks: Arc<ChunkStore>,
    introspector: Arc<dyn GrammarIntrospector>,
    cache: Arc<MatchingCache>,
    build_lock: Mutex<()>,
}

impl PacksService {
    pub fn new(
        pool: SqlitePool,
        chunks: Arc<ChunkStore>,
        introspector: Arc<dyn GrammarIntrospector>,
    ) -> Self {
        let records = RecordStore::new(pool);
        let cache = Arc::new(MatchingCache::default());
        let invalidated = cache.clone();
        // runs inside the mutating call, before it returns
        records.observe(move || invalidated.invalidate());
        Self {
            records,
            chunks,
            introspector,
            cache,
            build_lock: Mutex::new(()),
        }
    }

    /// Find the pack matching a document's top element, if any.
    pub async fn match_with_pack(
        &self,
        local_name: &str,
        namespace_uri: &str,
    ) -> Result<Option<Pack>> {
        let table = self.matching_table().await?;
        match table.get(&make_match_key(local_name, namespace_uri)) {
            Some(&id) => self.records.get_record_by_id(id).await,
            None => Ok(None),
        }
    }

    /// A live view of [`match_with_pack`] for one pair: the receiver holds
    /// the current answer and updates after every pack change.
    ///
    /// [`match_with_pack`]: PacksService::match_with_pack
    pub fn watch_match(
        self: &Arc<Self>,
        local_name: &str,
        namespace_uri: &str,
    ) -> watch::Receiver<Option<Pack>> {
        let (tx, rx) = watch::channel(None);
        let service = self.clone();
        let local_name = local_name.to_string();
        let namespace_uri = namespace_uri.to_string();
        tokio::spawn(async move {
            let mut changes = service.records.subscribe();
            loop {
                let value = match service.match_with_pack(&local_name, &namespace_uri).await {
                    Ok(value) => value,
                    Err(error) => {
                        tracing::warn!(%error, "match re-evaluation failed");
                        None
                    }
                };
                if tx.send(value).is_err() {
                    break;
                }
                match changes.recv().await {
                    Ok(()) => {}
                    // missed signals collapse into one re-evaluation
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    async fn matching_table(&self) -> Result<MatchingTable> {
        let epoch = match self.cache.snapshot() {
            (_, Some(table)) => return Ok(table),
            (epoch, None) => epoch,
        };

        // single-flight: concurrent lookups share one build
        let _guard = self.build_lock.lock().await;
        if let (_, Some(table)) = self.cache.snapshot() {
            return Ok(table);
        }

        let table = Arc::new(self.build_matching_table().await?);
        // an overtaken build still answers this caller from the data it
        // read, but is not installed
        self.cache.install(epoch, table.clone());
        Ok(table)
    }

    async fn build_matching_table(&self) -> Result<HashMap<String, i64>> {
        let mut table = HashMap::new();
        for pack in self.records.get_records().await? {
            let Some(id) = pack.id else { continue };
            if !pack.match_spec.is_automatic() {
                add_to_matching_data(
                    &mut table,
                    make_match_key(&pack.match_spec.local_name, &pack.match_spec.namespace_uri),
                    id,
                );
                continue;
            }

            let schema = self.chunks.chunk_data(&pack.schema).await?;
            let roots = match self.introspector.possible_roots(&schema) {
                Ok(roots) => roots,
                Err(error) => {
                    tracing::warn!(pack = %pack.name, %error, "cannot introspect schema; pack will not match automatically");
                    continue;
                }
            };
            for event in roots {
                // ambiguous name classes cannot contribute a key
                let Some(names) = event.names else { continue };
                if names.len() != 1 {
                    continue;
                }
                add_to_matching_data(
                    &mut table,
                    make_match_key(&names[0].local_name, &names[0].namespace_uri),
                    id,
                );
            }
        }
        Ok(table)
    }
}

fn make_match_key(local_name: &str, namespace_uri: &str) -> String {
    format!("{{{namespace_uri}}}{local_name}")
}

fn add_to_matching_data(table: &mut HashMap<String, i64>, key: String, id: i64) {
    let entry = table.entry(key).or_insert(id);
    if id > *entry {
        *entry = id;
    }
}

#[async_trait]
impl RecordFormat for PacksService {
    type Record = Pack;

    fn records(&self) -> &RecordStore<Pack> {
        &self.records
    }

    /// Build a pack from its interchange form. The interchange carries its
    /// own name; the `name` argument (a file name) is ignored.
    async fn make_record(&self, _name: &str, data: String) -> Result<Pack> {
        let interchange: PackInterchange = serde_json::from_str(&data)?;
        if interchange.interchange_version != PACK_INTERCHANGE_VERSION {
            return Err(StoreError::UnsupportedVersion(interchange.interchange_version).into());
        }

        let schema = self
            .chunks
            .update_record(&Chunk::make(interchange.schema).await?)
            .await?;
        let metadata = match interchange.metadata {
            Some(text) => Some(
                self.chunks
                    .update_record(&Chunk::make(text).await?)
                    .await?
                    .id,
            ),
            None => None,
        };

        let mut pack = Pack::new(interchange.name);
        pack.schema = schema.id;
        pack.metadata = metadata;
        pack.mode = interchange.mode;
        pack.match_spec = interchange.match_spec;
        Ok(pack)
    }

    async fn get_download_data(&self, record: &Pack) -> Result<String> {
        let schema = self.chunks.chunk_data(&record.schema).await?;
        let metadata = match &record.metadata {
            Some(id) => Some(self.chunks.chunk_data(id).await?),
            None => None,
        };
        Ok(serde_json::to_string(&PackInterchange {
            interchange_version: PACK_INTERCHANGE_VERSION,
            name: record.name.clone(),
            schema,
            metadata,
            mode: record.mode.clone(),
            match_spec: record.match_spec.clone(),
        })?)
    }
}
