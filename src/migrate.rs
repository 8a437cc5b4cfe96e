//! Schema creation for the record tables.
//!
//! Record tables (`xmlfiles`, `packs`, `schemas`, `metadata`) share a
//! layout: a surrogate integer key, a unique `name`, a `record_version`
//! used by the upgrade scan, and the full serialized record in a JSON
//! `data` column. `xmlfiles` additionally mirrors its pack association
//! into an indexed `pack` column. The `chunks` table is keyed by content
//! digest instead and holds the raw text payload.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            record_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS xmlfiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            record_version INTEGER NOT NULL,
            pack INTEGER,
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in ["packs", "schemas", "metadata"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                record_version INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    // record_version indexes keep the startup upgrade scan fast
    for table in ["xmlfiles", "packs", "schemas", "metadata", "chunks"] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_record_version ON {table}(record_version)"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_xmlfiles_pack ON xmlfiles(pack)")
        .execute(pool)
        .await?;

    tracing::info!("schema migrations applied");
    Ok(())
}
