//! Remote record source boundary.
//!
//! The scheduler never talks to the partner store's transport directly; it
//! pulls records through [`RemoteRecordSource`]. The daemon embedding this
//! crate implements it over whatever wire the deployment uses. For embedded
//! and test deployments, [`crate::records::RecordStore`] implements the
//! trait directly over its local database.
//!
//! Both operations are watermark-driven: "everything strictly newer than
//! this timestamp", so a failed fetch can simply be retried on the next
//! tick without bookkeeping.

use crate::audit::{StreamKind, TransactionRecord};
use std::future::Future;
use std::pin::Pin;

/// Transport-level failure talking to the remote store.
///
/// Deliberately opaque: the scheduler only needs to know the tick degraded
/// to a no-op, not why.
#[derive(Debug)]
pub struct RemoteError(pub String);

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote source error: {}", self.0)
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Boxed future used by the object-safe source trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RemoteResult<T>> + Send + 'a>>;

/// Pull access to the partner store's Transaction Record log.
pub trait RemoteRecordSource: Send + Sync + 'static {
    /// Count records on `stream` with `timestamp_created` strictly newer
    /// than `watermark`.
    fn count_newer_than(&self, stream: StreamKind, watermark: i64) -> BoxFuture<'_, u64>;

    /// Fetch up to `limit` records on `stream` strictly newer than
    /// `watermark`, ordered by ascending `timestamp_created`.
    fn fetch_newer_than(
        &self,
        stream: StreamKind,
        watermark: i64,
        limit: u32,
    ) -> BoxFuture<'_, Vec<TransactionRecord>>;
}
