//! Opening the agent database.
//!
//! Both constructors apply the same pragmas and bring the schema up to date
//! before handing out a handle.

use std::path::Path;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::Error;

/// WAL lets cache reads proceed while a write transaction is open.
/// `foreign_keys` must be on for generation deletes to cascade to artifacts.
const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA busy_timeout=5000;
     PRAGMA foreign_keys=ON;";

/// Shared handle to the artifact and mutation tables.
///
/// All statements run on the tokio-rusqlite worker thread. Clones share the
/// same connection, so the router, lifecycle manager and queue can each hold one.
#[derive(Clone, Debug)]
pub struct AgentDb {
    pub(crate) conn: Connection,
}

impl AgentDb {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await.map_err(|e| Error::Database(e.into()))?;
        tracing::debug!(path = %path.display(), "opened agent database");
        Self::prepare(conn).await
    }

    /// Open a private in-memory database. Contents vanish with the last clone.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::from)?;
        migrations::run(&conn).await?;
        Ok(Self { conn })
    }
}
