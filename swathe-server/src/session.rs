//! Trail Session Driver
//!
//! One `TrailSession` exists per open trail, i.e. per (vehicle, operation)
//! pair, and is single-writer: only the owning vehicle's position feed
//! drives it. The session owns the sample buffer, the lifecycle state
//! machine and the coverage accumulator, and runs the commit protocol
//! against the trail store.
//!
//! Commits fire on a timer or when the buffer reaches the batch size,
//! whichever comes first, bounding both memory growth and the staleness of
//! shared overlap data. Transient store failures retry with capped
//! exponential backoff while the buffered samples are preserved; the retry
//! of a non-final commit is cancelled by a close request, and its samples
//! roll into the final flush.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use swathe_core::buffer::SampleBuffer;
use swathe_core::coverage::{CoverageAccumulator, CoverageFootprint, CoverageIncrement};
use swathe_core::overlap::{compute_overlap, OverlapResult};
use swathe_core::projection::LocalProjection;
use swathe_core::sample::GeoSample;
use swathe_core::trail::{AbortReason, CommitFlags, TrailIncrement, TrailMachine};
use swathe_core::types::{GeoPoint, OperationId, VehicleId};

use crate::fleet::OperationRegistry;
use crate::store::TrailStore;
use crate::sync::SyncView;
use crate::{now_ms, TrackerError};

/// Timing and sizing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of periodic commits
    pub commit_interval: Duration,
    /// Buffered samples that trigger an early commit
    pub commit_batch: usize,
    /// Hard bound on buffered + pending samples
    pub buffer_capacity: usize,
    /// Attempts per commit (and per open/close) before giving up
    pub retry_budget: u32,
    /// Timeout on every store call
    pub store_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            commit_interval: Duration::from_secs(5),
            commit_batch: 50,
            buffer_capacity: 5000,
            retry_budget: 5,
            store_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

/// Control messages from the fleet to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Graceful close: final flush, freeze stats
    Close,
    /// Forced end: best-effort single flush, then discard
    Abort(AbortReason),
}

/// A drained batch whose commit has not yet been acknowledged.
#[derive(Debug, Clone)]
struct PendingCommit {
    samples: Vec<GeoSample>,
    coverage: CoverageIncrement,
    overlap: OverlapResult,
}

enum CommitOutcome {
    /// Nothing to commit, or the commit was acknowledged
    Clean,
    /// A close request cancelled the retry; samples stay pending
    Cancelled,
    /// Retry budget exhausted or non-retryable store failure
    Fatal,
}

pub struct TrailSession {
    key: String,
    config: SessionConfig,
    machine: TrailMachine,
    buffer: SampleBuffer,
    pending: Option<PendingCommit>,
    /// Created on the first accepted sample, once the operation anchor
    /// is known
    accumulator: Option<CoverageAccumulator>,
    /// Own committed coverage so far (this trail's earlier increments)
    footprint: CoverageFootprint,
    swath_width_m: f64,
    store: Arc<dyn TrailStore>,
    sync: SyncView,
    operations: OperationRegistry,
    sample_rx: mpsc::Receiver<GeoSample>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    /// Cancelled by a close request; stops non-final commit retries only
    close_cancel: CancellationToken,
    /// Child of the fleet-wide shutdown token
    shutdown: CancellationToken,
}

impl TrailSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vehicle: VehicleId,
        operation: OperationId,
        swath_width_m: f64,
        config: SessionConfig,
        store: Arc<dyn TrailStore>,
        sync: SyncView,
        operations: OperationRegistry,
        sample_rx: mpsc::Receiver<GeoSample>,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        close_cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        let key = format!("{}@{}", vehicle, operation);
        let buffer = SampleBuffer::new(config.buffer_capacity);
        TrailSession {
            key,
            machine: TrailMachine::new(vehicle, operation),
            buffer,
            pending: None,
            accumulator: None,
            footprint: CoverageFootprint::empty(),
            swath_width_m,
            config,
            store,
            sync,
            operations,
            sample_rx,
            cmd_rx,
            close_cancel,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<(), TrackerError> {
        if !self.open().await? {
            return Ok(());
        }

        log::info!(
            "{}: trail {} active",
            self.key,
            self.machine.trail_id().map(|t| t.0.as_str()).unwrap_or("?")
        );

        let mut next_commit = Instant::now() + self.config.commit_interval;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.abort_trail(AbortReason::Shutdown, true).await;
                    return Err(TrackerError::Shutdown);
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Close) | None => {
                        return self.close_flow().await;
                    }
                    Some(SessionCommand::Abort(reason)) => {
                        self.abort_trail(reason, true).await;
                        return Ok(());
                    }
                },

                maybe = self.sample_rx.recv() => match maybe {
                    Some(sample) => {
                        if self.accept_sample(sample) {
                            log::error!("{}: sample buffer overflow, aborting", self.key);
                            self.abort_trail(AbortReason::BufferOverflow, false).await;
                            return Ok(());
                        }
                        if self.buffer.len() >= self.config.commit_batch {
                            match self.commit_cycle(false).await {
                                CommitOutcome::Fatal => {
                                    self.abort_trail(AbortReason::CommitFailed, false).await;
                                    return Ok(());
                                }
                                CommitOutcome::Clean | CommitOutcome::Cancelled => {}
                            }
                            next_commit = Instant::now() + self.config.commit_interval;
                        }
                    }
                    None => {
                        // The feed dropped us: vehicle left the operation
                        self.abort_trail(AbortReason::Deassigned, true).await;
                        return Ok(());
                    }
                },

                _ = sleep_until(next_commit) => {
                    match self.commit_cycle(false).await {
                        CommitOutcome::Fatal => {
                            self.abort_trail(AbortReason::CommitFailed, false).await;
                            return Ok(());
                        }
                        CommitOutcome::Clean | CommitOutcome::Cancelled => {}
                    }
                    next_commit = Instant::now() + self.config.commit_interval;
                },
            }
        }
    }

    /// Issue the open request, retrying transient failures. Samples
    /// arriving while the open is in flight keep buffering and are
    /// replayed into the first commit; a cancel discards them.
    ///
    /// Returns false when the trail ended without becoming active.
    async fn open(&mut self) -> Result<bool, TrackerError> {
        let start_ms = now_ms();
        self.machine.start(start_ms)?;
        log::debug!("{}: opening trail", self.key);

        let vehicle = self.machine.vehicle().clone();
        let operation = self.machine.operation().clone();
        let mut attempt: u32 = 0;

        loop {
            let call = self
                .store
                .open_trail(&vehicle, &operation, start_ms, self.swath_width_m);
            match timeout(self.config.store_timeout, call).await {
                Ok(Ok(trail_id)) => {
                    self.machine.opened(trail_id)?;
                    return Ok(true);
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    log::error!("{}: open rejected: {}", self.key, e);
                    self.machine.open_failed(now_ms())?;
                    return Ok(false);
                }
                Ok(Err(e)) => {
                    attempt += 1;
                    log::warn!("{}: open attempt {} failed: {}", self.key, attempt, e);
                }
                Err(_) => {
                    attempt += 1;
                    log::warn!("{}: open attempt {} timed out", self.key, attempt);
                }
            }

            if attempt >= self.config.retry_budget {
                log::error!("{}: open failed after {} attempts", self.key, attempt);
                self.machine.open_failed(now_ms())?;
                return Ok(false);
            }

            let deadline = Instant::now() + self.backoff(attempt);
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    _ = self.close_cancel.cancelled() => {
                        log::info!("{}: open cancelled, discarding {} samples",
                            self.key, self.buffer.len());
                        self.machine.abort(AbortReason::Cancelled, now_ms())?;
                        return Ok(false);
                    },
                    _ = self.shutdown.cancelled() => {
                        self.machine.abort(AbortReason::Shutdown, now_ms())?;
                        return Err(TrackerError::Shutdown);
                    },
                    maybe = self.sample_rx.recv() => match maybe {
                        Some(sample) => {
                            if self.accept_sample(sample) {
                                self.machine.abort(AbortReason::BufferOverflow, now_ms())?;
                                return Ok(false);
                            }
                        }
                        None => {
                            self.machine.abort(AbortReason::Deassigned, now_ms())?;
                            return Ok(false);
                        }
                    },
                }
            }
        }
    }

    /// Validate and buffer one sample. Returns true on buffer overflow,
    /// which is fatal for the trail.
    fn accept_sample(&mut self, sample: GeoSample) -> bool {
        let position = GeoPoint::new(sample.latitude, sample.longitude);
        match self.buffer.accept(sample) {
            Ok(()) => {
                if self.accumulator.is_none() {
                    // First accepted sample fixes the operation anchor
                    // (shared by every vehicle of the operation)
                    let anchor = self
                        .operations
                        .anchor_or_insert(self.machine.operation(), position);
                    self.accumulator = Some(CoverageAccumulator::new(
                        LocalProjection::new(anchor),
                        self.swath_width_m,
                    ));
                }
                let pending_len = self.pending.as_ref().map(|p| p.samples.len()).unwrap_or(0);
                self.buffer.len() + pending_len >= self.config.buffer_capacity
            }
            Err(e) => {
                // Sample-level errors never abort a healthy trail
                log::debug!("{}: dropped sample: {}", self.key, e);
                false
            }
        }
    }

    /// Drain the buffer into a pending batch with derived geometry and
    /// overlap, unless a batch is already pending from a cancelled retry.
    fn prepare_pending(&mut self) {
        if self.pending.is_some() || self.buffer.is_empty() {
            return;
        }
        let samples = self.buffer.drain();
        let accumulator = match self.accumulator.as_mut() {
            Some(acc) => acc,
            None => return,
        };

        let coverage = accumulator.derive(&samples);
        let snapshot = self.sync.snapshot(self.machine.operation());
        let mut priors = snapshot.prior_footprints(self.machine.trail_id());
        priors.push(&self.footprint);
        let overlap = compute_overlap(&coverage, &priors, snapshot.partial);

        self.pending = Some(PendingCommit {
            samples,
            coverage,
            overlap,
        });
    }

    /// One commit: drain, derive, persist with retries. Non-final retries
    /// are cancelled by a close request; the batch then stays pending for
    /// the final flush.
    async fn commit_cycle(&mut self, is_final: bool) -> CommitOutcome {
        self.prepare_pending();
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return CommitOutcome::Clean,
        };

        let trail_id = match self.machine.trail_id() {
            Some(id) => id.clone(),
            None => return CommitOutcome::Fatal,
        };
        let seq = match self.machine.commit_seq() {
            Ok(seq) => seq,
            Err(e) => {
                log::error!("{}: {}", self.key, e);
                return CommitOutcome::Fatal;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let mut flags = CommitFlags::empty();
            if is_final {
                flags |= CommitFlags::FINAL;
            }
            if pending.overlap.partial {
                flags |= CommitFlags::PARTIAL_OVERLAP;
            }
            if attempt > 0 {
                flags |= CommitFlags::REPLAYED;
            }

            let increment = TrailIncrement {
                seq,
                samples: pending.samples.clone(),
                coverage: pending.coverage.clone(),
                overlap: pending.overlap,
                flags,
            };

            let call = self.store.commit_increment(&trail_id, &increment);
            match timeout(self.config.store_timeout, call).await {
                Ok(Ok(())) => {
                    if let Err(e) = self
                        .machine
                        .commit_applied(&pending.coverage, &pending.overlap)
                    {
                        log::error!("{}: {}", self.key, e);
                        return CommitOutcome::Fatal;
                    }
                    self.footprint.merge(&pending.coverage);
                    let stats = self.machine.stats();
                    log::debug!(
                        "{}: committed seq {} ({} samples, {:.1} m, {:.1} m², overlap {:.0}%)",
                        self.key,
                        seq,
                        pending.samples.len(),
                        pending.coverage.distance_m,
                        pending.coverage.area_m2,
                        stats.overlap_fraction * 100.0
                    );
                    return CommitOutcome::Clean;
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    log::error!("{}: commit seq {} rejected: {}", self.key, seq, e);
                    self.pending = Some(pending);
                    return CommitOutcome::Fatal;
                }
                Ok(Err(e)) => {
                    attempt += 1;
                    log::warn!(
                        "{}: commit seq {} attempt {} failed: {}",
                        self.key,
                        seq,
                        attempt,
                        e
                    );
                }
                Err(_) => {
                    attempt += 1;
                    log::warn!(
                        "{}: commit seq {} attempt {} timed out",
                        self.key,
                        seq,
                        attempt
                    );
                }
            }

            if attempt >= self.config.retry_budget {
                log::error!(
                    "{}: commit seq {} failed after {} attempts",
                    self.key,
                    seq,
                    attempt
                );
                self.pending = Some(pending);
                return CommitOutcome::Fatal;
            }

            let deadline = Instant::now() + self.backoff(attempt);
            tokio::select! {
                _ = sleep_until(deadline) => {},
                _ = self.close_cancel.cancelled(), if !is_final => {
                    log::debug!("{}: commit retry cancelled by close", self.key);
                    self.pending = Some(pending);
                    return CommitOutcome::Cancelled;
                },
            }
        }
    }

    /// Graceful close: flush everything still buffered or pending as final
    /// commits, then finalize the trail record.
    async fn close_flow(&mut self) -> Result<(), TrackerError> {
        if let Err(e) = self.machine.close_requested() {
            log::debug!("{}: close ignored: {}", self.key, e);
            return Ok(());
        }
        log::info!("{}: closing trail", self.key);

        // A batch left over from a cancelled retry commits first, then
        // whatever is still in the buffer.
        while self.pending.is_some() || !self.buffer.is_empty() {
            match self.commit_cycle(true).await {
                CommitOutcome::Clean => {}
                CommitOutcome::Cancelled | CommitOutcome::Fatal => {
                    self.abort_trail(AbortReason::CommitFailed, false).await;
                    return Ok(());
                }
            }
        }

        let end_ms = now_ms();
        if !self.close_store(end_ms, CommitFlags::FINAL).await {
            self.abort_trail(AbortReason::CommitFailed, false).await;
            return Ok(());
        }

        self.machine.close_completed(end_ms)?;
        let stats = self.machine.stats();
        log::info!(
            "{}: trail closed: {:.1} m, {:.3} ha covered, {:.3} ha overlap ({:.0}%)",
            self.key,
            stats.distance_m,
            stats.covered_ha(),
            stats.overlap_ha(),
            stats.overlap_fraction * 100.0
        );
        Ok(())
    }

    /// Persist the close record, retrying transient failures.
    async fn close_store(&mut self, end_ms: u64, flags: CommitFlags) -> bool {
        let trail_id = match self.machine.trail_id() {
            Some(id) => id.clone(),
            None => return false,
        };
        let stats = *self.machine.stats();

        let mut attempt: u32 = 0;
        loop {
            let call = self.store.close_trail(&trail_id, end_ms, stats, flags);
            match timeout(self.config.store_timeout, call).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) if !e.is_retryable() => {
                    log::error!("{}: close rejected: {}", self.key, e);
                    return false;
                }
                Ok(Err(e)) => {
                    attempt += 1;
                    log::warn!("{}: close attempt {} failed: {}", self.key, attempt, e);
                }
                Err(_) => {
                    attempt += 1;
                    log::warn!("{}: close attempt {} timed out", self.key, attempt);
                }
            }
            if attempt >= self.config.retry_budget {
                log::error!("{}: close failed after {} attempts", self.key, attempt);
                return false;
            }
            sleep_until(Instant::now() + self.backoff(attempt)).await;
        }
    }

    /// Force the trail to `Aborted`. With `flush`, uncommitted samples get
    /// one best-effort commit first; they are discarded either way.
    async fn abort_trail(&mut self, reason: AbortReason, flush: bool) {
        if flush {
            self.prepare_pending();
            if let Some(pending) = self.pending.take() {
                if let (Some(trail_id), Ok(seq)) =
                    (self.machine.trail_id().cloned(), self.machine.commit_seq())
                {
                    let mut flags = CommitFlags::empty();
                    if pending.overlap.partial {
                        flags |= CommitFlags::PARTIAL_OVERLAP;
                    }
                    let increment = TrailIncrement {
                        seq,
                        samples: pending.samples.clone(),
                        coverage: pending.coverage.clone(),
                        overlap: pending.overlap,
                        flags,
                    };
                    let call = self.store.commit_increment(&trail_id, &increment);
                    if let Ok(Ok(())) = timeout(self.config.store_timeout, call).await {
                        let _ = self
                            .machine
                            .commit_applied(&pending.coverage, &pending.overlap);
                    }
                }
            }
        }

        // Discard anything left; an aborted trail keeps only committed stats
        self.pending = None;
        self.buffer.drain();

        if self.machine.trail_id().is_some() {
            let end_ms = now_ms();
            let _ = self
                .close_store(end_ms, CommitFlags::ABORTED)
                .await;
        }
        if let Err(e) = self.machine.abort(reason, now_ms()) {
            log::debug!("{}: {}", self.key, e);
        }
        log::warn!("{}: trail aborted: {:?}", self.key, reason);
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(8);
        (self.config.backoff_initial * factor).min(self.config.backoff_max)
    }
}
