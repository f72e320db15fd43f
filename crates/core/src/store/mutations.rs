//! Deferred mutation queue storage.
//!
//! FIFO order is the insertion sequence, not the timestamp, so two
//! mutations enqueued within the same clock tick still drain in order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio_rusqlite::params;
use uuid::Uuid;

use super::connection::AgentDb;
use super::traits::MutationQueue;
use crate::Error;
use crate::model::{MutationDraft, QueuedMutation};

#[async_trait]
impl MutationQueue for AgentDb {
    async fn enqueue(&self, draft: MutationDraft) -> Result<QueuedMutation, Error> {
        if draft.url.trim().is_empty() {
            return Err(Error::InvalidInput("mutation url cannot be empty".into()));
        }

        let mutation = QueuedMutation {
            id: Uuid::now_v7().to_string(),
            url: draft.url,
            method: draft.method.to_ascii_uppercase(),
            headers: draft.headers,
            body: draft.body,
            enqueued_at: Utc::now().to_rfc3339(),
        };
        let headers_json = serde_json::to_string(&mutation.headers)?;

        let record = mutation.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO mutations (id, url, method, headers_json, body, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![record.id, record.url, record.method, headers_json, record.body, record.enqueued_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(id = %mutation.id, method = %mutation.method, url = %mutation.url, "mutation enqueued");
        Ok(mutation)
    }

    async fn pending(&self) -> Result<Vec<QueuedMutation>, Error> {
        let rows = self
            .conn
            .call(|conn| -> Result<Vec<(String, String, String, String, Option<String>, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, url, method, headers_json, body, enqueued_at
                     FROM mutations ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(id, url, method, headers_json, body, enqueued_at)| {
                let headers: BTreeMap<String, String> = serde_json::from_str(&headers_json)?;
                Ok(QueuedMutation { id, url, method, headers, body, enqueued_at })
            })
            .collect()
    }

    async fn remove(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM mutations WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn pending_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM mutations", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
