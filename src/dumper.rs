//! Batching and delivery of readings to the metric sink.
//!
//! The dumper task owns the batch. A flush happens when the batch reaches
//! `flush_point_count` points or `flush_after` has passed since the last
//! successful flush, checked on every reading and on a periodic tick. A
//! failed flush is retried with a capped linear backoff until it succeeds or
//! the dumper is cancelled.

use crate::config::MetadataFieldSet;
use crate::devices::Reading;
use crate::metrics;
use crate::point::{Point, Precision};
use crate::sink::{MetricSink, SinkError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub type FieldSets = BTreeMap<String, BTreeMap<String, MetadataFieldSet>>;

/// Wait before retry number `failures` is
/// `initial_wait + step * (failures / step_every)`, never more than `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_wait: Duration,
    pub step: Duration,
    pub step_every: u32,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(1),
            step: Duration::from_secs(1),
            step_every: 10,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn wait_after(&self, failures: u32) -> Duration {
        let steps = failures / self.step_every.max(1);
        self.initial_wait
            .saturating_add(self.step.saturating_mul(steps))
            .min(self.max_wait)
    }
}

#[derive(Debug, Clone)]
pub struct DumperConfig {
    pub database: String,
    pub precision: Precision,
    pub flush_point_count: usize,
    pub flush_after: Duration,
    pub flush_tick: Duration,
    pub retry: RetryPolicy,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            database: "slurp-rtl_433".to_string(),
            precision: Precision::Seconds,
            flush_point_count: 200,
            flush_after: Duration::from_secs(10),
            flush_tick: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed,
    Cancelled,
}

/// Counters reported when the dumper exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DumpStats {
    pub received: u64,
    /// Readings that could not be turned into a point.
    pub dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub points_written: u64,
    /// Points still pending when the dumper gave up on them.
    pub points_lost: u64,
}

#[derive(Debug)]
pub struct Batch {
    points: Vec<Point>,
    last_flush: Instant,
}

impl Batch {
    fn new() -> Self {
        Self {
            points: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn since_last_flush(&self) -> Duration {
        self.last_flush.elapsed()
    }
}

pub struct Dumper {
    sink: Arc<dyn MetricSink>,
    config: DumperConfig,
    meta: FieldSets,
    batch: Batch,
    stats: DumpStats,
    cancel: CancellationToken,
}

pub struct DumperHandle {
    cancel: CancellationToken,
    handle: JoinHandle<DumpStats>,
}

impl Dumper {
    /// Check the sink is reachable, then spawn the delivery task.
    pub async fn start(
        sink: Arc<dyn MetricSink>,
        config: DumperConfig,
        meta: FieldSets,
        readings: mpsc::Receiver<Box<dyn Reading>>,
        cancel: CancellationToken,
    ) -> Result<DumperHandle, SinkError> {
        sink.ping().await?;
        info!(
            database = %config.database,
            flush_point_count = config.flush_point_count,
            flush_after_secs = config.flush_after.as_secs(),
            "sink reachable; starting dumper"
        );

        let dumper = Dumper {
            sink,
            config,
            meta,
            batch: Batch::new(),
            stats: DumpStats::default(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(dumper.run(readings).instrument(info_span!("dumper")));
        Ok(DumperHandle { cancel, handle })
    }

    async fn run(mut self, mut readings: mpsc::Receiver<Box<dyn Reading>>) -> DumpStats {
        let tick = self.config.flush_tick.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("dumper received a request to stop");
                    break;
                }
                maybe_reading = readings.recv() => {
                    let Some(reading) = maybe_reading else {
                        info!("reading channel closed; stopping dumper");
                        break;
                    };
                    self.push(reading);
                    let due = self.batch.len() >= self.config.flush_point_count
                        || self.batch.since_last_flush() >= self.config.flush_after;
                    if due && self.flush_until_cancel().await == FlushOutcome::Cancelled {
                        return self.abandon();
                    }
                }
                _ = ticker.tick() => {
                    if !self.batch.is_empty()
                        && self.batch.since_last_flush() >= self.config.flush_after
                        && self.flush_until_cancel().await == FlushOutcome::Cancelled
                    {
                        return self.abandon();
                    }
                }
            }
        }

        // Readings already queued were committed upstream; take them along.
        readings.close();
        while let Ok(reading) = readings.try_recv() {
            self.push(reading);
        }
        self.final_flush().await;
        self.stats
    }

    fn push(&mut self, reading: Box<dyn Reading>) {
        self.stats.received += 1;
        let field_sets = self.meta.get(reading.model());
        match reading.to_point(field_sets) {
            Ok(point) => {
                self.batch.points.push(point);
                metrics::PENDING_POINTS.set(self.batch.len() as i64);
            }
            Err(err) => {
                self.stats.dropped += 1;
                metrics::POINTS_DROPPED_TOTAL
                    .with_label_values(&["build_error"])
                    .inc();
                warn!(error = %err, model = %reading.model(), "dropping reading");
            }
        }
    }

    /// One write of the whole batch.
    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.batch.is_empty() {
            self.batch.last_flush = Instant::now();
            return Ok(());
        }

        let timer = metrics::FLUSH_DURATION.start_timer();
        let result = self
            .sink
            .write(
                &self.config.database,
                self.config.precision,
                &self.batch.points,
            )
            .await;
        timer.observe_duration();

        match result {
            Ok(()) => {
                let count = self.batch.len();
                self.batch.points.clear();
                self.batch.last_flush = Instant::now();
                self.stats.flushes += 1;
                self.stats.points_written += count as u64;
                metrics::FLUSHES_TOTAL.with_label_values(&["ok"]).inc();
                metrics::POINTS_WRITTEN_TOTAL.inc_by(count as u64);
                metrics::PENDING_POINTS.set(0);
                info!(count, "flushed points to sink");
                Ok(())
            }
            Err(err) => {
                self.stats.failed_flushes += 1;
                metrics::FLUSHES_TOTAL.with_label_values(&["error"]).inc();
                Err(err)
            }
        }
    }

    /// Flush, retrying with backoff until the write succeeds or the dumper
    /// is cancelled.
    async fn flush_until_cancel(&mut self) -> FlushOutcome {
        let mut failures = 0u32;
        loop {
            match self.flush().await {
                Ok(()) => return FlushOutcome::Flushed,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let wait = self.config.retry.wait_after(failures);
                    error!(
                        error = %err,
                        failures,
                        pending = self.batch.len(),
                        wait_ms = wait.as_millis() as u64,
                        "failed to write batch; retrying"
                    );
                    let cancelled = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => true,
                        _ = sleep(wait) => false,
                    };
                    if cancelled {
                        return FlushOutcome::Cancelled;
                    }
                }
            }
        }
    }

    fn abandon(mut self) -> DumpStats {
        let lost = self.batch.len() as u64;
        self.stats.points_lost += lost;
        metrics::POINTS_DROPPED_TOTAL
            .with_label_values(&["shutdown"])
            .inc_by(lost);
        info!(lost, "dumper stopped while retrying a flush");
        self.stats
    }

    async fn final_flush(&mut self) {
        if self.batch.is_empty() {
            debug!("nothing pending at shutdown");
            return;
        }
        let pending = self.batch.len();
        if let Err(err) = self.flush().await {
            self.stats.points_lost += pending as u64;
            metrics::POINTS_DROPPED_TOTAL
                .with_label_values(&["shutdown"])
                .inc_by(pending as u64);
            error!(error = %err, lost = pending, "final flush failed");
        }
    }
}

impl DumperHandle {
    /// Cancel the dumper and wait up to `max_wait` for its final flush.
    pub async fn stop(self, max_wait: Duration) -> DumpStats {
        self.cancel.cancel();
        self.join(max_wait).await
    }

    /// Wait for the dumper to exit on its own, e.g. after its input closed.
    pub async fn join(self, max_wait: Duration) -> DumpStats {
        match tokio::time::timeout(max_wait, self.handle).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(err)) => {
                error!(error = %err, "dumper task failed");
                DumpStats::default()
            }
            Err(_) => {
                warn!(
                    wait_secs = max_wait.as_secs(),
                    "dumper did not stop in time; detaching"
                );
                DumpStats::default()
            }
        }
    }
}
