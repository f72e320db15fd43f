//! Artifact and generation storage.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio_rusqlite::{params, rusqlite};

use super::connection::AgentDb;
use super::traits::ArtifactStore;
use crate::Error;
use crate::model::{Artifact, Headers, Response, ResponseKind};

const SELECT_ARTIFACT: &str = "SELECT key, method, url, status, status_text, headers_json, body, stored_at
     FROM artifacts";

/// Raw column values, decoded outside the rusqlite row callback so JSON
/// failures surface as [`Error::CorruptRecord`].
struct ArtifactRow {
    key: String,
    method: String,
    url: String,
    status: u16,
    status_text: String,
    headers_json: String,
    body: Vec<u8>,
    stored_at: String,
}

impl ArtifactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            method: row.get(1)?,
            url: row.get(2)?,
            status: row.get(3)?,
            status_text: row.get(4)?,
            headers_json: row.get(5)?,
            body: row.get(6)?,
            stored_at: row.get(7)?,
        })
    }

    fn into_artifact(self) -> Result<Artifact, Error> {
        let headers: Headers = serde_json::from_str(&self.headers_json)?;
        Ok(Artifact {
            key: self.key,
            method: self.method,
            url: self.url,
            response: Response {
                status: self.status,
                status_text: self.status_text,
                headers,
                body: Bytes::from(self.body),
                kind: ResponseKind::Basic,
            },
            stored_at: self.stored_at,
        })
    }
}

fn ensure_generation(conn: &rusqlite::Connection, tag: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO generations (tag, created_at) VALUES (?1, ?2)",
        params![tag, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn generation_exists(conn: &rusqlite::Connection, tag: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT EXISTS(SELECT 1 FROM generations WHERE tag = ?1)", params![tag], |row| row.get(0))
}

fn upsert(conn: &rusqlite::Connection, generation: &str, artifact: &Artifact, headers_json: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO artifacts (
            generation, key, method, url, status, status_text, headers_json, body, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(generation, key) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            status_text = excluded.status_text,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            generation,
            &artifact.key,
            &artifact.method,
            &artifact.url,
            artifact.response.status,
            &artifact.response.status_text,
            headers_json,
            artifact.response.body.as_ref(),
            &artifact.stored_at,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ArtifactStore for AgentDb {
    async fn get_artifact(&self, generation: &str, key: &str) -> Result<Option<Artifact>, Error> {
        let generation = generation.to_string();
        let key = key.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<ArtifactRow>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_ARTIFACT} WHERE generation = ?1 AND key = ?2"))?;
                match stmt.query_row(params![generation, key], ArtifactRow::from_row) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(ArtifactRow::into_artifact).transpose()
    }

    async fn create_generation(&self, tag: &str) -> Result<(), Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                ensure_generation(conn, &tag)?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn put_artifact(&self, generation: &str, artifact: &Artifact) -> Result<(), Error> {
        let generation = generation.to_string();
        let artifact = artifact.clone();
        let headers_json = serde_json::to_string(&artifact.response.headers)?;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                if !generation_exists(&tx, &generation)? {
                    return Err(Error::InvalidState(format!("generation {generation} does not exist")));
                }
                upsert(&tx, &generation, &artifact, &headers_json)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn install_artifacts(&self, generation: &str, artifacts: &[Artifact]) -> Result<(), Error> {
        let generation = generation.to_string();
        let rows = artifacts
            .iter()
            .map(|artifact| Ok((artifact.clone(), serde_json::to_string(&artifact.response.headers)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_generation(&tx, &generation)?;
                for (artifact, headers_json) in &rows {
                    upsert(&tx, &generation, artifact, headers_json)?;
                }
                tx.execute(
                    "UPDATE generations SET installed_at = ?2 WHERE tag = ?1",
                    params![generation, Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn is_installed(&self, tag: &str) -> Result<bool, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                Ok(conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE tag = ?1 AND installed_at IS NOT NULL)",
                    params![tag],
                    |row| row.get(0),
                )?)
            })
            .await
            .map_err(Error::from)
    }

    async fn list_artifacts(&self, generation: &str) -> Result<Vec<Artifact>, Error> {
        let generation = generation.to_string();
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<ArtifactRow>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_ARTIFACT} WHERE generation = ?1 ORDER BY url"))?;
                let rows = stmt.query_map(params![generation], ArtifactRow::from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    async fn generations(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT tag FROM generations ORDER BY created_at, tag")?;
                let tags = stmt.query_map([], |row| row.get(0))?;
                Ok(tags.collect::<Result<Vec<String>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_generation(&self, tag: &str) -> Result<u64, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM artifacts WHERE generation = ?1", params![tag])?;
                tx.execute("DELETE FROM generations WHERE tag = ?1", params![tag])?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn mark_activated(&self, tag: &str) -> Result<(), Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE generations SET activated_at = ?2 WHERE tag = ?1 AND installed_at IS NOT NULL",
                    params![tag, Utc::now().to_rfc3339()],
                )?;
                if updated == 0 {
                    return Err(Error::InvalidState(format!("generation {tag} has not been installed")));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn active_generation(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let result = conn.query_row(
                    "SELECT tag FROM generations WHERE activated_at IS NOT NULL
                     ORDER BY activated_at DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                );
                match result {
                    Ok(tag) => Ok(Some(tag)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }
}
