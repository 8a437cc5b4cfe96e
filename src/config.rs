use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Directory that receives the full database dump written before a
    /// schema upgrade is applied.
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[db]\npath = \"data/packstore.sqlite\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.db.path, PathBuf::from("data/packstore.sqlite"));
        assert_eq!(config.backup.dir, PathBuf::from("backups"));
    }

    #[test]
    fn test_backup_dir_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[db]\npath = \"a.sqlite\"\n\n[backup]\ndir = \"/var/backups/packstore\""
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backup.dir, PathBuf::from("/var/backups/packstore"));
    }

    #[test]
    fn test_missing_db_section_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backup]\ndir = \"backups\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
