//! Record-version upgrades.
//!
//! Version 1 packs predate the match rule and cannot participate in
//! matching; the upgrade deletes them and detaches the XML files that
//! referenced them, in one transaction. [`UpgradeService`] wraps the
//! pass with the operator-facing flow: announce, back the database up to
//! a dump file, apply, report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::confirm::Confirmer;
use crate::dump;
use crate::models::{XmlFile, PACK_RECORD_VERSION};

/// The upgrade pass itself, with no user interaction.
pub struct Upgrade {
    pool: SqlitePool,
}

impl Upgrade {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether applying the upgrade would change anything.
    pub async fn will_modify_database(&self) -> Result<bool> {
        let obsolete: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM packs WHERE record_version < ?")
                .bind(PACK_RECORD_VERSION)
                .fetch_one(&self.pool)
                .await?;
        Ok(obsolete > 0)
    }

    /// Delete obsolete packs and detach their files. A no-op when nothing
    /// is obsolete; all-or-nothing otherwise.
    pub async fn apply(&self) -> Result<()> {
        if !self.will_modify_database().await? {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let obsolete: Vec<i64> = sqlx::query_scalar("SELECT id FROM packs WHERE record_version < ?")
            .bind(PACK_RECORD_VERSION)
            .fetch_all(&mut *tx)
            .await?;

        let placeholders = vec!["?"; obsolete.len()].join(", ");
        let sql = format!("SELECT id, data FROM xmlfiles WHERE pack IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in &obsolete {
            query = query.bind(id);
        }
        let referencing = query.fetch_all(&mut *tx).await?;

        for row in referencing {
            let id: i64 = row.get("id");
            let data: String = row.get("data");
            let mut file: XmlFile = serde_json::from_str(&data)
                .with_context(|| format!("corrupt xmlfiles row {id}"))?;
            file.pack = None;
            sqlx::query("UPDATE xmlfiles SET pack = NULL, data = ? WHERE id = ?")
                .bind(serde_json::to_string(&file)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM packs WHERE record_version < ?")
            .bind(PACK_RECORD_VERSION)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            packs = deleted.rows_affected(),
            "removed obsolete packs"
        );
        Ok(())
    }
}

/// The operator-facing upgrade flow.
pub struct UpgradeService {
    pool: SqlitePool,
    confirmer: Arc<dyn Confirmer>,
    backup_dir: PathBuf,
}

impl UpgradeService {
    pub fn new(pool: SqlitePool, confirmer: Arc<dyn Confirmer>, backup_dir: PathBuf) -> Self {
        Self {
            pool,
            confirmer,
            backup_dir,
        }
    }

    /// Run the upgrade if needed. Returns the backup file path when work
    /// was done, `None` when the database was already current or the
    /// confirmer declined.
    pub async fn upgrade(&self) -> Result<Option<PathBuf>> {
        let pass = Upgrade::new(self.pool.clone());
        if !pass.will_modify_database().await? {
            return Ok(None);
        }

        let proceed = self
            .confirmer
            .confirm(
                "The database needs to be upgraded. A backup will be made before the upgrade. Proceed?",
            )
            .await?;
        if !proceed {
            return Ok(None);
        }

        let backup = self.write_backup().await?;

        match pass.apply().await {
            Ok(()) => {
                self.confirmer.alert("Upgrade successful.").await?;
                Ok(Some(backup))
            }
            Err(error) => {
                self.confirmer
                    .alert(&format!(
                        "Upgrade failed; the database was not modified. A backup was saved to {}.",
                        backup.display()
                    ))
                    .await?;
                Err(error)
            }
        }
    }

    async fn write_backup(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let snapshot = dump::dump(&self.pool).await?;
        let path = self
            .backup_dir
            .join(format!("backup-{}.json", Utc::now().format("%Y%m%dT%H%M%S")));
        tokio::fs::write(&path, serde_json::to_string_pretty(&snapshot)?).await?;
        tracing::info!(path = %path.display(), "wrote pre-upgrade backup");
        Ok(path)
    }
}
