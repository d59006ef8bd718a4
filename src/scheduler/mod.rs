// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication scheduler.
//!
//! The orchestrator that ties together:
//! - Remote record fetching via [`crate::remote::RemoteRecordSource`]
//! - Replay via [`crate::apply::ApplyEngine`]
//! - Watermark persistence via [`crate::watermark::WatermarkStore`]
//! - Age-based pruning of the local [`crate::records::RecordStore`]
//!
//! # Architecture
//!
//! Each replication stream gets its own [`StreamReplicator`] owning one
//! worker task. Streams are fully independent: starting, stopping, or a
//! failure on one never touches the other, and ticks within a stream never
//! overlap because a single task runs them sequentially.
//! [`ReplicationService`] bundles the per-stream replicators behind one
//! start/stop surface for the embedding daemon.

mod poll;
mod types;

pub use types::StreamState;

use crate::apply::ApplyEngine;
use crate::audit::StreamKind;
use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::metrics;
use crate::records::RecordStore;
use crate::remote::RemoteRecordSource;
use crate::watermark::WatermarkStore;
use poll::PollContext;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// How long to wait for a worker to drain before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker handle for one replication stream.
pub struct StreamReplicator<G: GraphStore, R: RemoteRecordSource> {
    stream: StreamKind,
    config: crate::config::SchedulerConfig,
    ctx: PollContext<G, R>,
    state_tx: watch::Sender<StreamState>,
    state_rx: watch::Receiver<StreamState>,
    handle: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

impl<G: GraphStore, R: RemoteRecordSource> StreamReplicator<G, R> {
    fn new(
        stream: StreamKind,
        config: crate::config::SchedulerConfig,
        ctx: PollContext<G, R>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(StreamState::Stopped);
        Self {
            stream,
            config,
            ctx,
            state_tx,
            state_rx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn this stream's worker. Idempotent: starting a running stream is
    /// a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            debug!(stream = %self.stream, "Worker already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stream = self.stream;
        let config = self.config.clone();
        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move {
            poll::run_poller(stream, config, ctx, shutdown_rx).await;
        });

        *guard = Some((shutdown_tx, task));
        let _ = self.state_tx.send(StreamState::Running);
        metrics::set_stream_state(self.stream, true);
        info!(stream = %self.stream, "Stream worker started");
        Ok(())
    }

    /// Signal the worker to stop and wait for it to drain. Idempotent:
    /// stopping a stopped stream is a no-op.
    pub async fn stop(&self) {
        let Some((shutdown_tx, mut task)) = self.handle.lock().await.take() else {
            debug!(stream = %self.stream, "Worker already stopped");
            return;
        };

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => debug!(stream = %self.stream, "Worker drained"),
            Ok(Err(e)) => warn!(stream = %self.stream, error = %e, "Worker panicked"),
            Err(_) => {
                // A worker stuck in a remote call cannot drain; abort it so
                // a later start() never runs beside a zombie tick.
                warn!(stream = %self.stream, "Worker timed out on shutdown, aborting");
                task.abort();
            }
        }

        let _ = self.state_tx.send(StreamState::Stopped);
        metrics::set_stream_state(self.stream, false);
        info!(stream = %self.stream, "Stream worker stopped");
    }

    /// Current worker state.
    pub fn status(&self) -> StreamState {
        *self.state_rx.borrow()
    }
}

/// Per-stream replication workers behind one lifecycle surface.
///
/// Constructed once by the embedding daemon with the host graph, the local
/// record log, the remote boundary, and the watermark store.
pub struct ReplicationService<G: GraphStore, R: RemoteRecordSource> {
    replicators: HashMap<StreamKind, StreamReplicator<G, R>>,
    config: ReplicationConfig,
}

impl<G: GraphStore, R: RemoteRecordSource> ReplicationService<G, R> {
    pub fn new(
        config: ReplicationConfig,
        graph: Arc<G>,
        records: Arc<RecordStore>,
        remote: Arc<R>,
        watermarks: Arc<WatermarkStore>,
    ) -> Self {
        let apply = ApplyEngine::new(graph, config.natural_key.clone());
        let ctx = PollContext {
            watermarks,
            records,
            remote,
            apply,
        };

        let replicators = StreamKind::ALL
            .into_iter()
            .map(|stream| {
                (
                    stream,
                    StreamReplicator::new(stream, config.scheduler.clone(), ctx.clone()),
                )
            })
            .collect();

        Self {
            replicators,
            config,
        }
    }

    fn replicator(&self, stream: StreamKind) -> &StreamReplicator<G, R> {
        // Constructor seeds every StreamKind.
        &self.replicators[&stream]
    }

    /// Start one stream's worker.
    pub async fn start(&self, stream: StreamKind) -> Result<()> {
        self.config.validate()?;
        self.replicator(stream).start().await
    }

    /// Stop one stream's worker, draining the in-flight tick.
    pub async fn stop(&self, stream: StreamKind) {
        self.replicator(stream).stop().await;
    }

    /// Start workers for every stream.
    pub async fn start_all(&self) -> Result<()> {
        for stream in StreamKind::ALL {
            self.start(stream).await?;
        }
        Ok(())
    }

    /// Stop all workers.
    pub async fn stop_all(&self) {
        for stream in StreamKind::ALL {
            self.stop(stream).await;
        }
    }

    /// Current state of one stream's worker.
    pub fn status(&self, stream: StreamKind) -> StreamState {
        self.replicator(stream).status()
    }
}
