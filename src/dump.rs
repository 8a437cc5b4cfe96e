//! Whole-database dump and load.
//!
//! The dump is a versioned JSON document carrying every table's rows
//! verbatim: record rows as their serialized JSON form, chunk rows with
//! the content inlined under `file`. Loading replaces the entire
//! database contents in one transaction; a failed load leaves the
//! previous contents intact.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::StoreError;

pub const DUMP_INTERCHANGE_VERSION: i64 = 1;

const RECORD_TABLES: &[&str] = &["xmlfiles", "schemas", "metadata", "packs"];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dump {
    pub creation_date: String,
    pub interchange_version: i64,
    pub tables: Tables,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub chunks: Vec<Value>,
    #[serde(default)]
    pub xmlfiles: Vec<Value>,
    #[serde(default)]
    pub schemas: Vec<Value>,
    #[serde(default)]
    pub metadata: Vec<Value>,
    #[serde(default)]
    pub packs: Vec<Value>,
}

impl Tables {
    fn rows(&self, table: &str) -> &[Value] {
        match table {
            "xmlfiles" => &self.xmlfiles,
            "schemas" => &self.schemas,
            "metadata" => &self.metadata,
            "packs" => &self.packs,
            _ => &[],
        }
    }

    fn rows_mut(&mut self, table: &str) -> &mut Vec<Value> {
        match table {
            "xmlfiles" => &mut self.xmlfiles,
            "schemas" => &mut self.schemas,
            "metadata" => &mut self.metadata,
            "packs" => &mut self.packs,
            _ => unreachable!("unknown record table"),
        }
    }
}

pub async fn dump(pool: &SqlitePool) -> Result<Dump> {
    let mut tables = Tables::default();

    let rows = sqlx::query("SELECT id, content, record_version FROM chunks ORDER BY id")
        .fetch_all(pool)
        .await?;
    for row in rows {
        tables.chunks.push(serde_json::json!({
            "id": row.get::<String, _>("id"),
            "file": row.get::<String, _>("content"),
            "recordVersion": row.get::<i64, _>("record_version"),
        }));
    }

    for table in RECORD_TABLES {
        let rows = sqlx::query(&format!("SELECT data FROM {table} ORDER BY id"))
            .fetch_all(pool)
            .await?;
        let out = tables.rows_mut(table);
        for row in rows {
            let data: String = row.get("data");
            out.push(serde_json::from_str(&data)?);
        }
    }

    Ok(Dump {
        creation_date: Utc::now().to_rfc3339(),
        interchange_version: DUMP_INTERCHANGE_VERSION,
        tables,
    })
}

/// Replace the database contents with a dump's. All-or-nothing: any bad
/// row rolls the whole load back.
pub async fn load(pool: &SqlitePool, dump: &Dump) -> Result<()> {
    if dump.interchange_version != DUMP_INTERCHANGE_VERSION {
        return Err(StoreError::UnsupportedVersion(dump.interchange_version).into());
    }

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
    for table in RECORD_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }

    for row in &dump.tables.chunks {
        sqlx::query("INSERT INTO chunks (id, content, record_version) VALUES (?, ?, ?)")
            .bind(str_field(row, "id")?)
            .bind(str_field(row, "file")?)
            .bind(int_field(row, "recordVersion")?)
            .execute(&mut *tx)
            .await?;
    }

    for table in RECORD_TABLES {
        for row in dump.tables.rows(table) {
            insert_record_row(&mut tx, table, row).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn insert_record_row(tx: &mut SqliteConnection, table: &str, row: &Value) -> Result<()> {
    let pack_col = if table == "xmlfiles" { ", pack" } else { "" };
    let pack_placeholder = if table == "xmlfiles" { ", ?" } else { "" };
    let sql = format!(
        "INSERT INTO {table} (id, name, record_version{pack_col}, data) \
         VALUES (?, ?, ?{pack_placeholder}, ?)"
    );

    let mut query = sqlx::query(&sql)
        .bind(int_field(row, "id")?)
        .bind(str_field(row, "name")?)
        .bind(int_field(row, "recordVersion")?);
    if table == "xmlfiles" {
        query = query.bind(row.get("pack").and_then(Value::as_i64));
    }
    query.bind(row.to_string()).execute(tx).await?;
    Ok(())
}

fn str_field<'a>(row: &'a Value, field: &str) -> Result<&'a str> {
    row.get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("dump row missing field {field}: {row}"))
}

fn int_field(row: &Value, field: &str) -> Result<i64> {
    row.get(field)
        .and_then(Value::as_i64)
        .with_context(|| format!("dump row missing field {field}: {row}"))
}
