//! Shared helpers for integration tests.

use graph_replicator::remote::{BoxFuture, RemoteError, RemoteRecordSource};
use graph_replicator::{
    EndpointRef, EntityId, NodeState, RecordStore, RelationshipState, StreamKind,
    TransactionDelta, TransactionRecord,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A labeled node snapshot carrying a `uuid` natural key.
pub fn keyed_node(id: u64, label: &str, uuid: &str) -> NodeState {
    NodeState::new(id)
        .with_label(label)
        .with_property("uuid", json!(uuid))
}

/// Delta creating one keyed node with extra properties.
pub fn creation_delta(label: &str, uuid: &str, extra: &[(&str, Value)]) -> TransactionDelta {
    let mut node = keyed_node(1, label, uuid);
    for (name, value) in extra {
        node = node.with_property(*name, value.clone());
    }
    let mut delta = TransactionDelta::new();
    delta.created_nodes.push(node);
    delta
}

/// Delta deleting one keyed node.
pub fn deletion_delta(label: &str, uuid: &str) -> TransactionDelta {
    let mut delta = TransactionDelta::new();
    delta.deleted_nodes.push(keyed_node(1, label, uuid));
    delta
}

/// Delta creating a relationship between two live keyed nodes.
pub fn relationship_delta(rel: &str, start_uuid: &str, end_uuid: &str) -> TransactionDelta {
    let mut delta = TransactionDelta::new();
    delta.created_relationships.push(RelationshipState {
        id: EntityId(10),
        relationship_type: rel.to_string(),
        start: EndpointRef::Live(keyed_node(1, "Person", start_uuid)),
        end: EndpointRef::Live(keyed_node(2, "Person", end_uuid)),
        properties: Default::default(),
    });
    delta
}

/// Poll `check` until it returns true or the deadline passes.
pub async fn wait_for<F>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Remote source that always fails, for no-op tick tests.
pub struct FailingRemote;

impl RemoteRecordSource for FailingRemote {
    fn count_newer_than(&self, _stream: StreamKind, _watermark: i64) -> BoxFuture<'_, u64> {
        Box::pin(async { Err(RemoteError("connection refused".to_string())) })
    }

    fn fetch_newer_than(
        &self,
        _stream: StreamKind,
        _watermark: i64,
        _limit: u32,
    ) -> BoxFuture<'_, Vec<TransactionRecord>> {
        Box::pin(async { Err(RemoteError("connection refused".to_string())) })
    }
}

/// Remote source that fails its first `failures` calls, then delegates to a
/// real record store. Exercises recovery across ticks.
pub struct FlakyRemote {
    inner: Arc<RecordStore>,
    remaining_failures: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(inner: Arc<RecordStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
        }
    }

    fn should_fail(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RemoteRecordSource for FlakyRemote {
    fn count_newer_than(&self, stream: StreamKind, watermark: i64) -> BoxFuture<'_, u64> {
        Box::pin(async move {
            if self.should_fail() {
                return Err(RemoteError("transient outage".to_string()));
            }
            RemoteRecordSource::count_newer_than(self.inner.as_ref(), stream, watermark).await
        })
    }

    fn fetch_newer_than(
        &self,
        stream: StreamKind,
        watermark: i64,
        limit: u32,
    ) -> BoxFuture<'_, Vec<TransactionRecord>> {
        Box::pin(async move {
            if self.should_fail() {
                return Err(RemoteError("transient outage".to_string()));
            }
            RemoteRecordSource::fetch_newer_than(self.inner.as_ref(), stream, watermark, limit)
                .await
        })
    }
}
