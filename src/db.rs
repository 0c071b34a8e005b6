//! SQLite pool construction and the on-disk `storage/` tree (spec.md §6
//! "Persisted state layout"). Each subsystem gets its own database file so
//! a slow audit write never contends with the relational engine's locks.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Creates `storage/{databases,vectors,knowledge,feedback,audit}` under the
/// configured base directory, if they don't already exist.
pub fn ensure_storage_layout(config: &DatabaseConfig) -> std::io::Result<()> {
    for dir in [
        config.storage_dir().join("databases"),
        config.vectors_dir(),
        config.knowledge_path().parent().unwrap().to_path_buf(),
        config.feedback_db_path().parent().unwrap().to_path_buf(),
        config.audit_db_path().parent().unwrap().to_path_buf(),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}

/// Opens (creating if absent) a SQLite database at `path` with a small,
/// write-friendly pool: WAL journaling and a busy timeout so concurrent
/// readers don't immediately fail while an insert holds the writer lock.
pub async fn connect(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new().max_connections(8).connect_with(options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connects_and_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = connect(&path).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn ensure_storage_layout_creates_all_dirs() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig { base_dir: dir.path().to_string_lossy().to_string() };
        ensure_storage_layout(&config).unwrap();
        assert!(config.vectors_dir().exists());
        assert!(config.audit_db_path().parent().unwrap().exists());
    }
}
