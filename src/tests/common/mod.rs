//! Shared test helpers.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::PathBuf;

/// An in-memory SQLite pool for tests that only need the relational
/// engine, not a real file on disk.
pub async fn create_test_db() -> SqlitePool {
    SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.expect("failed to create test database")
}

/// A throwaway directory under the OS temp dir for tests exercising the
/// vector/knowledge stores, which persist JSON to disk and so need a real
/// path rather than an in-memory one. Callers are responsible for removing
/// it; `TestDir`'s `Drop` does this automatically.
pub struct TestDir(pub PathBuf);

impl TestDir {
    pub fn new(label: &str) -> Self {
        let path = std::env::temp_dir().join(format!("intelligence-service-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("failed to create scratch test directory");
        Self(path)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
