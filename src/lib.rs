// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Graph Replicator
//!
//! Replicates committed mutations between two independently-operated graph
//! stores. There is no shared cluster and no distributed transaction: the
//! source captures every qualifying commit as a self-describing Transaction
//! Record, and a remote instance polls for new records, replays them against
//! its own store, and advances a watermark.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────── source instance ───────────────────────────────┐
//! │                                                                              │
//! │  local edit ──► Judge ──► ChangeCapture ──► RecordStore (SQLite, append-only)│
//! │                 (gate)    (delta → audits)        │                          │
//! └───────────────────────────────────────────────────┼──────────────────────────┘
//!                                                     │ RemoteRecordSource
//! ┌────────────────────────────── target instance ────┼──────────────────────────┐
//! │                                                   ▼                          │
//! │  ReplicationService ──► StreamReplicator ──► ApplyEngine ──► GraphStore      │
//! │  (per-stream workers)   (poll / batch)       (replay)        (host graph)    │
//! │           │                                                                  │
//! │           └──► WatermarkStore (SQLite)      Pruner (age-based, source side)  │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replication Streams
//!
//! Two fully independent streams exist: [`StreamKind::Data`] and
//! [`StreamKind::Schema`]. Each has its own worker task, watermark singleton,
//! and record partition. Ticks for one stream never overlap.
//!
//! ## Delivery Semantics
//!
//! At-least-once, eventually consistent. Records are fetched in ascending
//! timestamp order (causal correctness: endpoint-creating records apply
//! before relationship records that reference them), the watermark advances
//! only after a record applied, and replays are idempotent: all resolution is
//! by natural key, deletes of missing entities are treated as already
//! applied, and property updates overwrite with the full snapshot
//! (last-write-wins).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use graph_replicator::{
//!     MemoryGraph, RecordStore, ReplicationConfig, ReplicationService,
//!     StreamKind, WatermarkStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> graph_replicator::Result<()> {
//!     let config = ReplicationConfig::default();
//!     let graph = Arc::new(MemoryGraph::new());
//!     let records = Arc::new(RecordStore::open(&config.storage.records_path).await?);
//!     let watermarks = Arc::new(WatermarkStore::open(&config.storage.watermarks_path).await?);
//!     // The remote side of the boundary; RecordStore itself implements it,
//!     // so an embedded deployment can point at another instance's store.
//!     let remote = Arc::clone(&records);
//!
//!     let service = ReplicationService::new(config, graph, records, remote, watermarks);
//!     service.start(StreamKind::Data).await?;
//!     // ... runs until stopped
//!     service.stop(StreamKind::Data).await;
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod audit;
pub mod capture;
pub mod config;
mod db;
pub mod delta;
pub mod error;
pub mod graph;
pub mod judge;
pub mod metrics;
pub mod records;
pub mod remote;
pub mod scheduler;
pub mod watermark;

// Re-exports for convenience
pub use apply::{ApplyEngine, ApplyReport};
pub use audit::{
    Audit, ChangeType, PropertyChange, PropertyMap, RecordStatus, StreamKind, TransactionRecord,
};
pub use capture::{CaptureOutcome, ChangeCapture};
pub use config::{ReplicationConfig, SchedulerConfig, StorageConfig};
pub use delta::{EndpointRef, EntityId, NodeState, RelationshipState, TransactionDelta};
pub use error::{ReplicationError, Result};
pub use graph::{GraphError, GraphStore, GraphTransaction, MemoryGraph, NodeId, RelationshipId};
pub use records::RecordStore;
pub use remote::{RemoteError, RemoteRecordSource};
pub use scheduler::{ReplicationService, StreamReplicator, StreamState};
pub use watermark::WatermarkStore;
