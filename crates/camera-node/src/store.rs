//! Durable event store.
//!
//! Workers hand completed events to an injected `EventStore`; the bundled
//! implementation keeps them in SQLite through a shared pool, which gives
//! concurrent workers atomic inserts without extra coordination.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::NewEvent;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Sink interface between workers and the external event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one event record; called only after the clip exists on disk.
    async fn record_event(&self, event: NewEvent) -> Result<i64>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    confidence REAL NOT NULL DEFAULT 0.0,
    frame_number INTEGER NOT NULL DEFAULT 0,
    bbox_x1 REAL,
    bbox_y1 REAL,
    bbox_x2 REAL,
    bbox_y2 REAL,
    clip_path TEXT NOT NULL,
    thumbnail_path TEXT NOT NULL,
    json_path TEXT,
    captured_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

/// Row shape returned by queries, for review tooling and tests.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: i64,
    pub camera_id: String,
    pub event_type: String,
    pub status: String,
    pub confidence: f64,
    pub frame_number: i64,
    pub clip_path: String,
    pub thumbnail_path: String,
}

impl SqliteEventStore {
    /// Connect and bootstrap the schema. `url` is a sqlx SQLite URL, e.g.
    /// `sqlite:///var/lib/tillwatch/events.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parse database url {url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connect event store")?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("bootstrap events schema")?;

        tracing::info!(url = %url, "event store ready");
        Ok(Self { pool })
    }

    pub async fn events_for_camera(&self, camera_id: &str) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            "SELECT id, camera_id, event_type, status, confidence, frame_number, \
             clip_path, thumbnail_path FROM events WHERE camera_id = ? ORDER BY id",
        )
        .bind(camera_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredEvent {
                id: row.get("id"),
                camera_id: row.get("camera_id"),
                event_type: row.get("event_type"),
                status: row.get("status"),
                confidence: row.get("confidence"),
                frame_number: row.get("frame_number"),
                clip_path: row.get("clip_path"),
                thumbnail_path: row.get("thumbnail_path"),
            })
            .collect())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn record_event(&self, event: NewEvent) -> Result<i64> {
        let bbox = event.bbox.map(|b| b.as_array());
        let result = sqlx::query(
            "INSERT INTO events (camera_id, event_type, confidence, frame_number, \
             bbox_x1, bbox_y1, bbox_x2, bbox_y2, clip_path, thumbnail_path, json_path, captured_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.camera_id)
        .bind(event.kind.as_str())
        .bind(event.confidence as f64)
        .bind(event.frame_index as i64)
        .bind(bbox.map(|b| b[0] as f64))
        .bind(bbox.map(|b| b[1] as f64))
        .bind(bbox.map(|b| b[2] as f64))
        .bind(bbox.map(|b| b[3] as f64))
        .bind(&event.clip_path)
        .bind(&event.thumbnail_path)
        .bind(&event.json_path)
        .bind(event.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("insert event record")?;

        Ok(result.last_insert_rowid())
    }
}
