// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable Transaction Record store backed by SQLite.
//!
//! Each source store keeps its own record log here; the partner pulls from
//! it through [`RemoteRecordSource`]. Records are partitioned by stream and
//! ordered by capture timestamp, and an age-based prune keeps the log
//! bounded.

use crate::audit::{RecordStatus, StreamKind, TransactionRecord};
use crate::db;
use crate::error::Result;
use crate::remote::{BoxFuture, RemoteError, RemoteRecordSource};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info};

const CREATE_RECORDS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS transaction_records (
        transaction_uuid TEXT PRIMARY KEY,
        stream TEXT NOT NULL,
        timestamp_created INTEGER NOT NULL,
        status TEXT NOT NULL,
        serialized_audits TEXT NOT NULL,
        raw_statement TEXT
    )";

const CREATE_TIMESTAMP_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_records_stream_timestamp
    ON transaction_records (stream, timestamp_created)";

/// SQLite-backed Transaction Record log.
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Open (creating if needed) the record database at `path`.
    /// `:memory:` gives an ephemeral store for tests.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = db::open_pool(path).await?;
        sqlx::query(CREATE_RECORDS_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_TIMESTAMP_INDEX).execute(&pool).await?;
        info!(path, "record store opened");
        Ok(Self { pool })
    }

    /// Persist one captured record on the given stream.
    ///
    /// Inserting the same transaction uuid twice is an error; capture
    /// generates a fresh uuid per record, so a conflict means a caller bug.
    pub async fn insert(&self, stream: StreamKind, record: &TransactionRecord) -> Result<()> {
        db::execute_with_retry("record_insert", || async {
            sqlx::query(
                "INSERT INTO transaction_records
                 (transaction_uuid, stream, timestamp_created, status, serialized_audits, raw_statement)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.transaction_uuid)
            .bind(stream.as_str())
            .bind(record.timestamp_created)
            .bind(record.status.as_str())
            .bind(&record.serialized_audits)
            .bind(&record.raw_statement)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        debug!(
            stream = %stream,
            transaction = %record.transaction_uuid,
            "record persisted"
        );
        Ok(())
    }

    /// Count records on `stream` strictly newer than `watermark`.
    pub async fn count_newer_than(&self, stream: StreamKind, watermark: i64) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM transaction_records
             WHERE stream = ? AND timestamp_created > ?",
        )
        .bind(stream.as_str())
        .bind(watermark)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// Fetch up to `limit` records on `stream` strictly newer than
    /// `watermark`, oldest first.
    pub async fn fetch_newer_than(
        &self,
        stream: StreamKind,
        watermark: i64,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            "SELECT transaction_uuid, timestamp_created, status, serialized_audits, raw_statement
             FROM transaction_records
             WHERE stream = ? AND timestamp_created > ?
             ORDER BY timestamp_created ASC
             LIMIT ?",
        )
        .bind(stream.as_str())
        .bind(watermark)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status_text: String = row.get("status");
            let status = status_text
                .parse::<RecordStatus>()
                .map_err(crate::error::ReplicationError::Internal)?;
            records.push(TransactionRecord {
                transaction_uuid: row.get("transaction_uuid"),
                timestamp_created: row.get("timestamp_created"),
                status,
                serialized_audits: row.get("serialized_audits"),
                raw_statement: row.get("raw_statement"),
            });
        }
        Ok(records)
    }

    /// Delete records on `stream` strictly older than `cutoff` (epoch ms).
    /// Returns the number of rows deleted.
    pub async fn prune_older_than(&self, stream: StreamKind, cutoff: i64) -> Result<u64> {
        let deleted = db::execute_with_retry("record_prune", || async {
            let result = sqlx::query(
                "DELETE FROM transaction_records
                 WHERE stream = ? AND timestamp_created < ?",
            )
            .bind(stream.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;
        if deleted > 0 {
            debug!(stream = %stream, deleted, cutoff, "pruned aged records");
        }
        Ok(deleted)
    }

    /// Close the underlying pool, flushing WAL state for file stores.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Embedded and test deployments point the scheduler straight at a local
// record store instead of a network transport.
impl RemoteRecordSource for RecordStore {
    fn count_newer_than(&self, stream: StreamKind, watermark: i64) -> BoxFuture<'_, u64> {
        Box::pin(async move {
            RecordStore::count_newer_than(self, stream, watermark)
                .await
                .map_err(|e| RemoteError(e.to_string()))
        })
    }

    fn fetch_newer_than(
        &self,
        stream: StreamKind,
        watermark: i64,
        limit: u32,
    ) -> BoxFuture<'_, Vec<TransactionRecord>> {
        Box::pin(async move {
            RecordStore::fetch_newer_than(self, stream, watermark, limit)
                .await
                .map_err(|e| RemoteError(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Audit, ChangeType};

    async fn store() -> RecordStore {
        RecordStore::open(":memory:").await.unwrap()
    }

    fn record_at(timestamp: i64) -> TransactionRecord {
        let mut record =
            TransactionRecord::seal(vec![Audit::new(ChangeType::AddNode)]).unwrap();
        record.timestamp_created = timestamp;
        record
    }

    #[tokio::test]
    async fn test_insert_and_fetch_ordered() {
        let store = store().await;
        // Inserted out of order, fetched ascending.
        store.insert(StreamKind::Data, &record_at(300)).await.unwrap();
        store.insert(StreamKind::Data, &record_at(100)).await.unwrap();
        store.insert(StreamKind::Data, &record_at(200)).await.unwrap();

        let fetched = store.fetch_newer_than(StreamKind::Data, 0, 10).await.unwrap();
        let timestamps: Vec<i64> = fetched.iter().map(|r| r.timestamp_created).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
        assert_eq!(fetched[0].status, RecordStatus::Committed);
    }

    #[tokio::test]
    async fn test_watermark_is_strict() {
        let store = store().await;
        store.insert(StreamKind::Data, &record_at(100)).await.unwrap();
        store.insert(StreamKind::Data, &record_at(200)).await.unwrap();

        // Records at exactly the watermark are excluded.
        assert_eq!(store.count_newer_than(StreamKind::Data, 100).await.unwrap(), 1);
        let fetched = store.fetch_newer_than(StreamKind::Data, 100, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].timestamp_created, 200);
    }

    #[tokio::test]
    async fn test_limit_applies() {
        let store = store().await;
        for ts in [100, 200, 300, 400] {
            store.insert(StreamKind::Data, &record_at(ts)).await.unwrap();
        }
        let fetched = store.fetch_newer_than(StreamKind::Data, 0, 2).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].timestamp_created, 200);
    }

    #[tokio::test]
    async fn test_streams_are_partitioned() {
        let store = store().await;
        store.insert(StreamKind::Data, &record_at(100)).await.unwrap();
        store.insert(StreamKind::Schema, &record_at(100)).await.unwrap();

        assert_eq!(store.count_newer_than(StreamKind::Data, 0).await.unwrap(), 1);
        assert_eq!(store.count_newer_than(StreamKind::Schema, 0).await.unwrap(), 1);

        store.prune_older_than(StreamKind::Data, 500).await.unwrap();
        assert_eq!(store.count_newer_than(StreamKind::Data, 0).await.unwrap(), 0);
        // Schema partition untouched.
        assert_eq!(store.count_newer_than(StreamKind::Schema, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_is_strictly_older() {
        let store = store().await;
        let day_ms: i64 = 24 * 60 * 60 * 1000;
        let now = 10 * day_ms;
        // Records aged 0..=5 days.
        for age_days in 0..=5 {
            store
                .insert(StreamKind::Data, &record_at(now - age_days * day_ms))
                .await
                .unwrap();
        }

        let cutoff = now - 3 * day_ms;
        let deleted = store.prune_older_than(StreamKind::Data, cutoff).await.unwrap();

        // Ages 4 and 5 go; the record exactly at the cutoff (age 3) stays.
        assert_eq!(deleted, 2);
        assert_eq!(store.count_newer_than(StreamKind::Data, 0).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_payload() {
        let store = store().await;
        let mut audit = Audit::new(ChangeType::AddNode);
        audit.node_labels.insert("Person".to_string());
        let record = TransactionRecord::seal(vec![audit]).unwrap();
        store.insert(StreamKind::Data, &record).await.unwrap();

        let fetched = store.fetch_newer_than(StreamKind::Data, 0, 1).await.unwrap();
        assert_eq!(fetched[0], record);
        let audits = fetched[0].audits().unwrap();
        assert!(audits[0].node_labels.contains("Person"));
    }

    #[tokio::test]
    async fn test_remote_source_impl_matches_inherent_api() {
        let store = store().await;
        store.insert(StreamKind::Data, &record_at(100)).await.unwrap();

        let remote: &dyn RemoteRecordSource = &store;
        assert_eq!(remote.count_newer_than(StreamKind::Data, 0).await.unwrap(), 1);
        let fetched = remote.fetch_newer_than(StreamKind::Data, 0, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
    }
}
