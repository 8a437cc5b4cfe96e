//! Generic CRUD over named, versioned record tables.
//!
//! [`RecordStore`] gives every record type the same persistence
//! operations: lookup by id or name, insert/replace, delete, clear, and a
//! change signal emitted after each committed mutation. The record's full
//! serialized form lives in the JSON `data` column; the indexed fields
//! (`name`, `record_version`, and any extras a type declares) are
//! mirrored into real columns so queries stay indexable.
//!
//! [`RecordFormat`] is the seam the typed services implement: how a
//! record is built from raw text and how it serializes back out for
//! download. Its provided methods cover the shared file-import flow,
//! including the overwrite check that consults a [`Confirmer`].

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::confirm::Confirmer;
use crate::error::StoreError;

/// A record that can live in a [`RecordStore`] table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;

    /// Extra integer columns mirrored out of the serialized record for
    /// indexed queries (the `pack` column on xmlfiles).
    const INDEXED: &'static [&'static str] = &[];

    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
    fn record_version(&self) -> i64;

    fn indexed_value(&self, _column: &str) -> Option<i64> {
        None
    }
}

/// The `{name, id}` projection used to populate selection lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub name: String,
    pub id: i64,
}

/// Result of [`RecordFormat::write_check`].
#[derive(Debug)]
pub struct WriteCheck<R> {
    pub write: bool,
    pub record: Option<R>,
}

type Observer = Box<dyn Fn() + Send + Sync>;

/// Persistent table of records of one type.
pub struct RecordStore<R: Record> {
    pool: SqlitePool,
    change: broadcast::Sender<()>,
    observers: Mutex<Vec<Observer>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStore<R> {
    pub fn new(pool: SqlitePool) -> Self {
        let (change, _) = broadcast::channel(16);
        Self {
            pool,
            change,
            observers: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Subscribe to the asynchronous change signal. One message is emitted
    /// after each committed insert, update, delete, or clear.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.change.subscribe()
    }

    /// Register a synchronous observer invoked before the mutating call
    /// returns. Derived caches use this so a reader that runs right after
    /// a mutation can never see stale derived state.
    pub fn observe(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.observers.lock().unwrap().push(Box::new(observer));
    }

    fn notify(&self) {
        for observer in self.observers.lock().unwrap().iter() {
            observer();
        }
        let _ = self.change.send(());
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<R> {
        let data: String = row.get("data");
        let mut record: R = serde_json::from_str(&data)?;
        // the id column is authoritative
        record.set_id(row.get("id"));
        Ok(record)
    }

    pub async fn get_records(&self) -> Result<Vec<R>> {
        let rows = sqlx::query(&format!("SELECT id, data FROM {} ORDER BY id", R::TABLE))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    pub async fn get_record_by_id(&self, id: i64) -> Result<Option<R>> {
        let row = sqlx::query(&format!("SELECT id, data FROM {} WHERE id = ?", R::TABLE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    pub async fn get_record_by_name(&self, name: &str) -> Result<Option<R>> {
        let row = sqlx::query(&format!("SELECT id, data FROM {} WHERE name = ?", R::TABLE))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// Insert or replace a record.
    ///
    /// A record without an id is inserted and assigned a fresh surrogate
    /// key; one with an id replaces the existing row by value. Name
    /// uniqueness is enforced by the table's unique index and violations
    /// propagate to the caller. Exactly one change signal is emitted on
    /// success; a failed write emits nothing.
    pub async fn update_record(&self, record: &R) -> Result<R> {
        let mut record = record.clone();

        match record.id() {
            Some(id) => {
                let set_extra: String = R::INDEXED
                    .iter()
                    .map(|col| format!(", {col} = ?"))
                    .collect();
                let sql = format!(
                    "UPDATE {} SET name = ?, record_version = ?, data = ?{set_extra} WHERE id = ?",
                    R::TABLE
                );
                let data = serde_json::to_string(&record)?;
                let mut query = sqlx::query(&sql)
                    .bind(record.name())
                    .bind(record.record_version())
                    .bind(&data);
                for col in R::INDEXED {
                    query = query.bind(record.indexed_value(col));
                }
                let result = query.bind(id).execute(&self.pool).await?;

                if result.rows_affected() == 0 {
                    // put semantics: a record carrying an id that is not in
                    // the table is stored under that id
                    self.insert(&record, Some(id)).await?;
                }
            }
            None => {
                let id = self.insert(&record, None).await?;
                record.set_id(id);
            }
        }

        self.notify();
        Ok(record)
    }

    async fn insert(&self, record: &R, id: Option<i64>) -> Result<i64> {
        let id_col = if id.is_some() { "id, " } else { "" };
        let id_placeholder = if id.is_some() { "?, " } else { "" };
        let extra_cols: String = R::INDEXED.iter().map(|col| format!(", {col}")).collect();
        let extra_placeholders: String = R::INDEXED.iter().map(|_| ", ?").collect();
        let sql = format!(
            "INSERT INTO {} ({id_col}name, record_version{extra_cols}, data) \
             VALUES ({id_placeholder}?, ?{extra_placeholders}, ?)",
            R::TABLE
        );

        let mut tx = self.pool.begin().await?;

        let mut record = record.clone();
        let mut query = sqlx::query(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        query = query.bind(record.name()).bind(record.record_version());
        for col in R::INDEXED {
            query = query.bind(record.indexed_value(col));
        }
        let result = query
            .bind(serde_json::to_string(&record)?)
            .execute(&mut *tx)
            .await?;

        let id = id.unwrap_or_else(|| result.last_insert_rowid());

        // re-serialize so the stored JSON carries the assigned id
        record.set_id(id);
        sqlx::query(&format!("UPDATE {} SET data = ? WHERE id = ?", R::TABLE))
            .bind(serde_json::to_string(&record)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Delete a record by its id.
    ///
    /// A record without an id is caller misuse ([`StoreError::MissingId`]).
    /// Removal is idempotent: the change signal fires whether or not a row
    /// was actually present.
    pub async fn delete_record(&self, record: &R) -> Result<()> {
        let id = record.id().ok_or(StoreError::MissingId)?;
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", R::TABLE))
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", R::TABLE))
            .execute(&self.pool)
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn get_name_id_array(&self) -> Result<Vec<NameId>> {
        let rows = sqlx::query(&format!("SELECT name, id FROM {} ORDER BY id", R::TABLE))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| NameId {
                name: row.get("name"),
                id: row.get("id"),
            })
            .collect())
    }

    pub async fn get_record_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", R::TABLE))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// How a record type is built from raw text and serialized back out.
///
/// The provided methods implement the shared file-import flow on top of
/// the two abstract operations, the way every typed service needs it.
#[async_trait]
pub trait RecordFormat: Send + Sync {
    type Record: Record;

    fn records(&self) -> &RecordStore<Self::Record>;

    /// Build a new record from raw text. The record is *not* saved by this
    /// method, though backing chunks may be persisted as a side effect.
    async fn make_record(&self, name: &str, data: String) -> Result<Self::Record>;

    /// Serialize a record's full payload to a transportable string.
    async fn get_download_data(&self, record: &Self::Record) -> Result<String>;

    /// Build a record from raw text and immediately save it.
    async fn save_new_record(&self, name: &str, data: String) -> Result<Self::Record> {
        let record = self.make_record(name, data).await?;
        self.records().update_record(&record).await
    }

    /// Import a file as a record.
    ///
    /// With `into`, the new payload replaces the existing record's while
    /// keeping its identity (id and name carry over).
    async fn load_from_file(
        &self,
        path: &Path,
        into: Option<&Self::Record>,
    ) -> Result<Self::Record> {
        let name = file_name(path);
        let data = tokio::fs::read_to_string(path).await?;
        let mut record = self.make_record(&name, data).await?;
        if let Some(existing) = into {
            if let Some(id) = existing.id() {
                record.set_id(id);
            }
            record.set_name(existing.name().to_string());
        }
        self.records().update_record(&record).await
    }

    /// Decide whether a write under `name` may proceed.
    ///
    /// A free name is always writable and the confirmer is not consulted.
    /// An occupied name asks the confirmer; the existing record rides
    /// along so the caller can load into it. This method never writes.
    async fn write_check(
        &self,
        name: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<WriteCheck<Self::Record>> {
        match self.records().get_record_by_name(name).await? {
            None => Ok(WriteCheck {
                write: true,
                record: None,
            }),
            Some(record) => {
                let write = confirmer
                    .confirm(&format!("Are you sure you want to overwrite {name}?"))
                    .await?;
                Ok(WriteCheck {
                    write,
                    record: Some(record),
                })
            }
        }
    }

    /// Import a file, asking before overwriting an existing record.
    ///
    /// Returns `None` if the confirmer declined. To load into a known
    /// record without confirmation, call [`load_from_file`] with the
    /// record instead.
    ///
    /// [`load_from_file`]: RecordFormat::load_from_file
    async fn safe_load_from_file(
        &self,
        path: &Path,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<Self::Record>> {
        let name = file_name(path);
        let WriteCheck { write, record } = self.write_check(&name, confirmer).await?;
        if !write {
            return Ok(None);
        }
        Ok(Some(self.load_from_file(path, record.as_ref()).await?))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::Schema;

    fn drain(rx: &mut broadcast::Receiver<()>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);

        let saved = store
            .update_record(&Schema::new("doc.rng", "abc123"))
            .await
            .unwrap();
        assert_eq!(saved.id, Some(1));

        let by_name = store.get_record_by_name("doc.rng").await.unwrap().unwrap();
        assert_eq!(by_name.id, Some(1));
        assert_eq!(by_name.chunk, "abc123");
    }

    #[tokio::test]
    async fn test_update_replaces_by_value() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);

        let mut saved = store
            .update_record(&Schema::new("doc.rng", "abc123"))
            .await
            .unwrap();
        saved.chunk = "def456".to_string();
        let replaced = store.update_record(&saved).await.unwrap();
        assert_eq!(replaced.id, saved.id);

        assert_eq!(store.get_record_count().await.unwrap(), 1);
        let read = store.get_record_by_id(1).await.unwrap().unwrap();
        assert_eq!(read.chunk, "def456");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        store
            .update_record(&Schema::new("doc.rng", "abc123"))
            .await
            .unwrap();

        let mut rx = store.subscribe();
        assert!(store
            .update_record(&Schema::new("doc.rng", "def456"))
            .await
            .is_err());
        // the failed write must not signal a change
        assert_eq!(drain(&mut rx), 0);
        assert_eq!(store.get_record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_id_is_caller_error() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        let err = store
            .delete_record(&Schema::new("doc.rng", "abc123"))
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>(), Some(&StoreError::MissingId));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        let saved = store
            .update_record(&Schema::new("doc.rng", "abc123"))
            .await
            .unwrap();

        let mut rx = store.subscribe();
        store.delete_record(&saved).await.unwrap();
        // the row is already gone; deleting again still signals
        store.delete_record(&saved).await.unwrap();
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(store.get_record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_name_id_array() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        store
            .update_record(&Schema::new("a.rng", "h1"))
            .await
            .unwrap();
        store
            .update_record(&Schema::new("b.rng", "h2"))
            .await
            .unwrap();

        let pairs = store.get_name_id_array().await.unwrap();
        assert_eq!(
            pairs,
            vec![
                NameId {
                    name: "a.rng".to_string(),
                    id: 1
                },
                NameId {
                    name: "b.rng".to_string(),
                    id: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_signals_once() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        store
            .update_record(&Schema::new("a.rng", "h1"))
            .await
            .unwrap();

        let mut rx = store.subscribe();
        store.clear().await.unwrap();
        assert_eq!(drain(&mut rx), 1);
        assert_eq!(store.get_record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_synchronous_observer_runs_before_return() {
        let store: RecordStore<Schema> = RecordStore::new(test_pool().await);
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits2 = hits.clone();
        store.observe(move || {
            hits2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        store
            .update_record(&Schema::new("a.rng", "h1"))
            .await
            .unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
