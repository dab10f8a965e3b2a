use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::ChatError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a connection pool for the database at `path` and run migrations.
///
/// `":memory:"` yields a single-connection pool so every checkout sees the
/// same in-memory database.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    let in_memory = path == Path::new(":memory:");
    let manager = if in_memory {
        SqliteConnectionManager::memory()
    } else {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create database dir {}", dir.display()))?;
        }
        SqliteConnectionManager::file(path)
    };
    let manager = manager.with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let builder = Pool::builder();
    let pool = if in_memory {
        builder.max_size(1).build(manager)?
    } else {
        builder.build(manager)?
    };
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(pool)
}

/// Initialize a standalone connection with the schema applied.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Run blocking database work on the blocking thread pool.
pub async fn with_conn<F, T>(pool: &DbPool, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&mut Connection) -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| ChatError::Storage(format!("database task failed: {e}")))?
}

/// Current server time in unix milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT UNIQUE NOT NULL,
  last_sender TEXT,
  last_content TEXT,
  last_time INTEGER
);

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
  profile_id INTEGER NOT NULL DEFAULT 0,
  sender TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
  kind TEXT NOT NULL CHECK (kind IN ('text', 'image')),
  content TEXT NOT NULL,
  caption TEXT,
  media_type TEXT,
  created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS messages_room_time ON messages(room_id, created_at, id);
"#;
