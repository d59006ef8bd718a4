// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-stream replication watermark persistence.
//!
//! The watermark is the `timestamp_created` of the newest remote record this
//! store has fully applied. It only moves forward: an attempted regression
//! is logged and ignored, so a redelivered or late record can never rewind
//! progress. Durability is what bounds redelivery after a crash - at-least-
//! once delivery means a watermark that lags reality only causes re-fetches,
//! never loss.
//!
//! Values are cached in memory; reads hit SQLite once per stream at startup.

use crate::audit::StreamKind;
use crate::db;
use crate::error::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const CREATE_WATERMARKS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS watermarks (
        stream TEXT PRIMARY KEY,
        last_replicated INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )";

/// SQLite-backed watermark store with a write-through cache.
pub struct WatermarkStore {
    pool: SqlitePool,
    cache: Arc<RwLock<HashMap<StreamKind, i64>>>,
}

impl WatermarkStore {
    /// Open (creating if needed) the watermark database at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = db::open_pool(path).await?;
        sqlx::query(CREATE_WATERMARKS_TABLE).execute(&pool).await?;
        info!(path, "watermark store opened");
        Ok(Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Current watermark for `stream`. A stream never seen before starts at
    /// zero, which is persisted so restarts observe the same origin.
    pub async fn get(&self, stream: StreamKind) -> Result<i64> {
        if let Some(value) = self.cache.read().await.get(&stream) {
            return Ok(*value);
        }

        let row = sqlx::query("SELECT last_replicated FROM watermarks WHERE stream = ?")
            .bind(stream.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let value = match row {
            Some(row) => row.get::<i64, _>("last_replicated"),
            None => {
                self.persist(stream, 0).await?;
                debug!(stream = %stream, "watermark initialized at origin");
                0
            }
        };
        self.cache.write().await.insert(stream, value);
        Ok(value)
    }

    /// Advance the watermark to `timestamp`. A value at or behind the
    /// current watermark is ignored with a warning; the watermark never
    /// rewinds.
    pub async fn advance(&self, stream: StreamKind, timestamp: i64) -> Result<()> {
        let current = self.get(stream).await?;
        if timestamp <= current {
            if timestamp < current {
                warn!(
                    stream = %stream,
                    current,
                    attempted = timestamp,
                    "ignoring watermark regression"
                );
            }
            return Ok(());
        }

        self.persist(stream, timestamp).await?;
        self.cache.write().await.insert(stream, timestamp);
        crate::metrics::set_watermark(stream, timestamp);
        debug!(stream = %stream, watermark = timestamp, "watermark advanced");
        Ok(())
    }

    /// Non-blocking peek at the cached watermark. `None` when the stream has
    /// not been read yet this process or the cache is momentarily locked.
    pub fn try_current(&self, stream: StreamKind) -> Option<i64> {
        self.cache
            .try_read()
            .ok()
            .and_then(|cache| cache.get(&stream).copied())
    }

    async fn persist(&self, stream: StreamKind, timestamp: i64) -> Result<()> {
        let updated_at = chrono::Utc::now().timestamp_millis();
        db::execute_with_retry("watermark_upsert", || async {
            sqlx::query(
                "INSERT INTO watermarks (stream, last_replicated, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(stream) DO UPDATE SET
                     last_replicated = excluded.last_replicated,
                     updated_at = excluded.updated_at",
            )
            .bind(stream.as_str())
            .bind(timestamp)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Flush WAL state to the main database file. No-op for `:memory:`.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
