// src/store/sqlite.rs
//! SQLite-backed event store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use crate::error::IngestError;
use crate::ingest::types::NormalizedEvent;
use crate::store::{EventStore, InsertOutcome};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing database url {url}"))?
            .create_if_missing(true);
        let mut pool_opts = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(5));
        pool_opts = if url.contains(":memory:") {
            // every connection to :memory: is its own database; keep exactly one alive
            pool_opts
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_opts.max_connections(5)
        };
        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        let store = Self { pool };
        store.init_tables().await?;
        tracing::info!(target: "store", url = %url, "event store ready");
        Ok(store)
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                link TEXT,
                closed TEXT,
                categories TEXT NOT NULL DEFAULT '[]',
                sources TEXT NOT NULL DEFAULT '[]',
                samples TEXT NOT NULL DEFAULT '[]',
                ingested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating events table")?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<NormalizedEvent>, IngestError> {
        let row = sqlx::query(
            "SELECT id, title, description, link, closed, categories, sources, samples \
             FROM events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |col: &str| -> Result<String, IngestError> { Ok(row.try_get(col)?) };
        let json_err = |e: serde_json::Error| IngestError::Storage(format!("decoding row {id}: {e}"));
        Ok(Some(NormalizedEvent {
            id: decode("id")?,
            title: decode("title")?,
            description: row.try_get("description")?,
            link: row.try_get("link")?,
            closed: row.try_get("closed")?,
            categories: serde_json::from_str(&decode("categories")?).map_err(json_err)?,
            sources: serde_json::from_str(&decode("sources")?).map_err(json_err)?,
            samples: serde_json::from_str(&decode("samples")?).map_err(json_err)?,
        }))
    }

    async fn insert_one(&self, ev: &NormalizedEvent) -> InsertOutcome {
        let encoded = (|| -> Result<_, serde_json::Error> {
            Ok((
                serde_json::to_string(&ev.categories)?,
                serde_json::to_string(&ev.sources)?,
                serde_json::to_string(&ev.samples)?,
            ))
        })();
        let (categories, sources, samples) = match encoded {
            Ok(v) => v,
            Err(e) => return InsertOutcome::Failed(format!("encoding: {e}")),
        };

        let res = sqlx::query(
            r#"
            INSERT INTO events (id, title, description, link, closed, categories, sources, samples, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ev.id)
        .bind(&ev.title)
        .bind(&ev.description)
        .bind(&ev.link)
        .bind(&ev.closed)
        .bind(categories)
        .bind(sources)
        .bind(samples)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => InsertOutcome::Inserted,
            Err(e) if is_unique_violation(&e) => InsertOutcome::Conflict,
            Err(e) => InsertOutcome::Failed(e.to_string()),
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn find_all_ids(&self) -> Result<HashSet<String>, IngestError> {
        let rows = sqlx::query("SELECT id FROM events")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(IngestError::from))
            .collect()
    }

    async fn insert_many(&self, events: &[NormalizedEvent]) -> Vec<InsertOutcome> {
        let mut out = Vec::with_capacity(events.len());
        for ev in events {
            out.push(self.insert_one(ev).await);
        }
        out
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::test_event;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_read_back() {
        let store = memory_store().await;
        let ev = test_event("EONET_1");
        assert_eq!(store.insert_many(std::slice::from_ref(&ev)).await, vec![InsertOutcome::Inserted]);
        assert_eq!(store.get("EONET_1").await.unwrap(), Some(ev));
        assert!(store.find_all_ids().await.unwrap().contains("EONET_1"));
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = memory_store().await;
        let evs = vec![test_event("A"), test_event("A"), test_event("B")];
        let out = store.insert_many(&evs).await;
        assert_eq!(
            out,
            vec![
                InsertOutcome::Inserted,
                InsertOutcome::Conflict,
                InsertOutcome::Inserted
            ]
        );
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let store = memory_store().await;
        store.init_tables().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
