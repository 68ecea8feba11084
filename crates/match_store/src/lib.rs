//! Match state store
//!
//! SQLite persistence for fixtures, their statistics/incidents, per-round
//! progress (with the cross-instance soft lock) and standings. One
//! connection behind a mutex; every call hops onto the blocking pool so the
//! async worker never stalls on disk I/O.

mod fixtures;
pub mod model;
mod rounds;
mod schema;
mod standings;
pub mod status;

pub use model::*;
pub use schema::SCHEMA_VERSION;
pub use status::ProcessingStatus;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::info;

#[derive(Clone)]
pub struct MatchStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl MatchStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let store = Self::init(conn)?;
        info!("🗄️ Match store ready at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("enable foreign keys")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool with exclusive use of the connection.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("store connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("store task panicked")?
    }
}

pub(crate) fn to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|secs| DateTime::from_timestamp(secs, 0))
}
