//! Pooled SQLite store for prompt/response interactions.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::{ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool and file settings for [`Store::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub max_open: u32,
    pub max_idle: u32,
    /// Zero means unlimited.
    pub max_lifetime: Duration,
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.db_path.clone(),
            max_open: config.db_max_open_conns,
            max_idle: config.db_max_idle_conns,
            max_lifetime: config.db_conn_max_lifetime,
        }
    }

    /// Small pool at `path`, for tools and tests.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_open: 4,
            max_idle: 1,
            max_lifetime: Duration::ZERO,
        }
    }
}

/// One line of the JSONL export.
#[derive(Debug, Serialize)]
struct ExportedInteraction {
    prompt: String,
    completion: String,
}

#[derive(Debug)]
pub enum StoreError {
    Pool(String),
    Sql(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    /// An insert touched a number of rows other than one.
    Inconsistent(usize),
    Task(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Pool(e) => write!(f, "connection pool error: {e}"),
            StoreError::Sql(e) => write!(f, "database error: {e}"),
            StoreError::Io(e) => write!(f, "export file error: {e}"),
            StoreError::Json(e) => write!(f, "export encoding error: {e}"),
            StoreError::Inconsistent(n) => write!(f, "expected 1 row affected, got {n}"),
            StoreError::Task(e) => write!(f, "database task failed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sql(e) => Some(e),
            StoreError::Io(e) => Some(e),
            StoreError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sql(e)
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Interaction log backed by a bounded connection pool.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database and make sure the schema exists.
    pub fn open(options: &StoreOptions) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(&options.path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));

        // r2d2 retries failed connects until its checkout timeout, so surface a
        // bad path here first.
        manager.connect()?;

        let max_lifetime = (!options.max_lifetime.is_zero()).then_some(options.max_lifetime);
        let pool = Pool::builder()
            .max_size(options.max_open)
            .min_idle(Some(options.max_idle.min(options.max_open)))
            .max_lifetime(max_lifetime)
            .build(manager)?;

        let store = Self {
            pool,
            path: options.path.clone(),
        };
        store.init_schema()?;

        info!(
            "Opened database {:?} ({} interactions, pool max {})",
            store.path,
            store.count_blocking()?,
            options.max_open
        );
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_input TEXT NOT NULL,
                llm_response TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one interaction.
    pub async fn log_interaction(&self, prompt: &str, response: &str) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let prompt = prompt.to_string();
        let response = response.to_string();

        blocking(move || {
            let conn = pool.get()?;
            let rows = conn.execute(
                "INSERT INTO interactions (user_input, llm_response) VALUES (?1, ?2)",
                params![prompt, response],
            )?;
            if rows != 1 {
                return Err(StoreError::Inconsistent(rows));
            }
            debug!("Logged interaction {}", conn.last_insert_rowid());
            Ok(())
        })
        .await
    }

    /// Write every interaction to `path` as JSON Lines, replacing any existing
    /// file. Returns the number of lines written.
    pub async fn export_all(&self, path: &Path) -> Result<usize, StoreError> {
        let pool = self.pool.clone();
        let path = path.to_path_buf();

        blocking(move || {
            let conn = pool.get()?;
            let mut stmt =
                conn.prepare("SELECT user_input, llm_response FROM interactions ORDER BY id")?;
            let mut rows = stmt.query([])?;

            let mut out = BufWriter::new(File::create(&path)?);
            let mut written = 0;
            while let Some(row) = rows.next()? {
                let entry = ExportedInteraction {
                    prompt: row.get(0)?,
                    completion: row.get(1)?,
                };
                serde_json::to_writer(&mut out, &entry)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            out.flush()?;

            info!("📤 Exported {} interactions to {:?}", written, path);
            Ok(written)
        })
        .await
    }

    /// Number of stored interactions.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let pool = self.pool.clone();
        blocking(move || count_rows(&pool)).await
    }

    fn count_blocking(&self) -> Result<usize, StoreError> {
        count_rows(&self.pool)
    }

    /// Release the pool. Connections close once the last checkout returns.
    pub fn close(self) {
        let state = self.pool.state();
        info!(
            "Closing database {:?} ({} connections, {} idle)",
            self.path, state.connections, state.idle_connections
        );
    }
}

fn count_rows(pool: &Pool<SqliteConnectionManager>) -> Result<usize, StoreError> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
    Ok(n as usize)
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions::at(dir.path().join("bot.db"))).unwrap();
        (dir, store)
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_log_interaction_inserts_one_row() {
        let (_dir, store) = open_temp();
        assert_eq!(store.count().await.unwrap(), 0);

        store.log_interaction("hello", "Hi there!").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_schema_is_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::at(dir.path().join("bot.db"));

        let store = Store::open(&options).unwrap();
        store.log_interaction("a", "b").await.unwrap();
        store.close();

        let store = Store::open(&options).unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_defaults_on_insert() {
        let (_dir, store) = open_temp();
        store.log_interaction("a", "b").await.unwrap();

        let conn = store.pool.get().unwrap();
        let ts: Option<String> = conn
            .query_row("SELECT timestamp FROM interactions", [], |row| row.get(0))
            .unwrap();
        assert!(ts.is_some());
    }

    #[tokio::test]
    async fn test_export_writes_one_line_per_row() {
        let (dir, store) = open_temp();
        store.log_interaction("hello", "Hi there!").await.unwrap();
        store.log_interaction("line1\nline2", "with \"quotes\"").await.unwrap();
        store.log_interaction("", "empty prompt").await.unwrap();

        let out = dir.path().join("export.jsonl");
        let written = store.export_all(&out).await.unwrap();
        assert_eq!(written, 3);

        let raw = std::fs::read_to_string(&out).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(!raw.starts_with('['));

        let lines = read_lines(&out);
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let obj = line.as_object().unwrap();
            assert_eq!(obj.len(), 2);
            assert!(obj.contains_key("prompt"));
            assert!(obj.contains_key("completion"));
        }
        assert_eq!(lines[0]["prompt"], "hello");
        assert_eq!(lines[0]["completion"], "Hi there!");
        assert_eq!(lines[1]["prompt"], "line1\nline2");
    }

    #[tokio::test]
    async fn test_export_overwrites_existing_file() {
        let (dir, store) = open_temp();
        let out = dir.path().join("export.jsonl");
        std::fs::write(&out, "stale\nstale\nstale\nstale\n").unwrap();

        store.log_interaction("q", "a").await.unwrap();
        store.export_all(&out).await.unwrap();

        assert_eq!(read_lines(&out).len(), 1);
    }

    #[tokio::test]
    async fn test_export_empty_table_creates_empty_file() {
        let (dir, store) = open_temp();
        let out = dir.path().join("export.jsonl");
        assert_eq!(store.export_all(&out).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_open_in_missing_directory_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("sub").join("bot.db");

        let started = std::time::Instant::now();
        let result = Store::open(&StoreOptions::at(&path));

        assert!(matches!(result, Err(StoreError::Sql(_))));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "open took {:?}",
            started.elapsed()
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_export_to_missing_directory_fails() {
        let (dir, store) = open_temp();
        let out = dir.path().join("nope").join("export.jsonl");
        let err = store.export_all(&out).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_all_land() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.log_interaction(&format!("q{i}"), &format!("a{i}")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_insert_fails_when_table_missing() {
        let (_dir, store) = open_temp();
        store
            .pool
            .get()
            .unwrap()
            .execute_batch("DROP TABLE interactions")
            .unwrap();

        let err = store.log_interaction("q", "a").await.unwrap_err();
        assert!(matches!(err, StoreError::Sql(_)));
    }
}
