//! One stream's poll loop.
//!
//! Each tick: read the watermark, count what the remote has beyond it, drain
//! it in batches through the replay engine, then prune aged local records.
//! Remote unavailability degrades the fetch side of a tick to a no-op;
//! pruning still runs, and the next tick retries from the same watermark.
//!
//! # Graceful Shutdown
//!
//! The loop checks the shutdown signal between ticks via `tokio::select!`
//! and between records while draining a batch. A record that has started
//! applying always finishes; its local transaction is never interrupted.

use crate::apply::ApplyEngine;
use crate::audit::StreamKind;
use crate::config::SchedulerConfig;
use crate::graph::GraphStore;
use crate::metrics;
use crate::records::RecordStore;
use crate::remote::RemoteRecordSource;
use crate::watermark::WatermarkStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Everything one tick needs, shared by both stream workers.
pub(crate) struct PollContext<G: GraphStore, R: RemoteRecordSource> {
    pub watermarks: Arc<WatermarkStore>,
    pub records: Arc<RecordStore>,
    pub remote: Arc<R>,
    pub apply: ApplyEngine<G>,
}

impl<G: GraphStore, R: RemoteRecordSource> Clone for PollContext<G, R> {
    fn clone(&self) -> Self {
        Self {
            watermarks: Arc::clone(&self.watermarks),
            records: Arc::clone(&self.records),
            remote: Arc::clone(&self.remote),
            apply: self.apply.clone(),
        }
    }
}

/// Run the poll loop for a single stream until shutdown is signaled.
pub(crate) async fn run_poller<G: GraphStore, R: RemoteRecordSource>(
    stream: StreamKind,
    config: SchedulerConfig,
    ctx: PollContext<G, R>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("stream_poller", stream = %stream);

    async move {
        info!(
            poll_interval = %config.poll_interval,
            batch_limit = config.batch_limit,
            retention_days = config.retention_days,
            "Starting stream poller"
        );

        let mut timer = tokio::time::interval(config.poll_interval_duration());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }

                _ = timer.tick() => {
                    let start = Instant::now();
                    run_tick(stream, &config, &ctx, &shutdown_rx).await;
                    metrics::record_tick_duration(stream, start.elapsed());
                }
            }
        }

        info!("Stream poller stopped");
    }
    .instrument(span)
    .await
}

/// One tick: drain pending remote records, then prune.
async fn run_tick<G: GraphStore, R: RemoteRecordSource>(
    stream: StreamKind,
    config: &SchedulerConfig,
    ctx: &PollContext<G, R>,
    shutdown_rx: &watch::Receiver<bool>,
) {
    let watermark = match ctx.watermarks.get(stream).await {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "Failed to read watermark, skipping tick");
            return;
        }
    };

    let pending = match ctx.remote.count_newer_than(stream, watermark).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, watermark, "Remote unavailable, skipping fetch");
            metrics::record_remote_unavailable(stream);
            0
        }
    };

    if pending > 0 && config.batch_limit > 0 {
        debug!(pending, watermark, "Draining pending records");
        drain_pending(stream, config, ctx, shutdown_rx, watermark, pending).await;
    }

    prune(stream, config, ctx).await;
}

/// Fetch and replay pending records in batches, oldest first.
///
/// The local cursor tracks the last fetched timestamp within this tick so a
/// failed record does not stall the batch; the durable watermark advances
/// only past records that applied, so anything skipped here is re-fetched on
/// the next tick.
async fn drain_pending<G: GraphStore, R: RemoteRecordSource>(
    stream: StreamKind,
    config: &SchedulerConfig,
    ctx: &PollContext<G, R>,
    shutdown_rx: &watch::Receiver<bool>,
    watermark: i64,
    pending: u64,
) {
    let mut cursor = watermark;
    let mut remaining = pending;

    while remaining > 0 {
        let batch = match ctx
            .remote
            .fetch_newer_than(stream, cursor, config.batch_limit)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, cursor, "Remote unavailable mid-drain, stopping");
                metrics::record_remote_unavailable(stream);
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        metrics::record_records_fetched(stream, batch.len());
        remaining = remaining.saturating_sub(batch.len() as u64);

        for record in &batch {
            // Between records only, never mid-apply.
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received mid-drain");
                return;
            }

            cursor = record.timestamp_created;
            match ctx.apply.apply_record(record) {
                Ok(report) => {
                    metrics::record_record_applied(stream, report.applied, report.failed);
                    if let Err(e) = ctx
                        .watermarks
                        .advance(stream, record.timestamp_created)
                        .await
                    {
                        // The record applied; a stale watermark only means
                        // redelivery, which replay tolerates.
                        warn!(error = %e, "Failed to persist watermark");
                    }
                }
                Err(e) => {
                    warn!(
                        transaction = %record.transaction_uuid,
                        error = %e,
                        "Record failed to replay, watermark not advanced"
                    );
                    metrics::record_replay_failure(stream);
                }
            }
        }
    }
}

/// Age-based prune of the local record log.
async fn prune<G: GraphStore, R: RemoteRecordSource>(
    stream: StreamKind,
    config: &SchedulerConfig,
    ctx: &PollContext<G, R>,
) {
    let cutoff = chrono::Utc::now().timestamp_millis() - config.retention_ms();
    match ctx.records.prune_older_than(stream, cutoff).await {
        Ok(0) => {}
        Ok(deleted) => {
            info!(deleted, cutoff, "Pruned aged records");
            metrics::record_pruned(stream, deleted);
        }
        Err(e) => {
            // Retried on the next tick.
            warn!(error = %e, "Prune failed");
            metrics::record_prune_failure(stream);
        }
    }
}
