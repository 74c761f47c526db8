//! Trail Store Client
//!
//! Boundary to the backend document store that owns trail records. All
//! calls are idempotent: increments are keyed by a client-generated
//! sequence number, so a retried commit is acknowledged without
//! double-counting.
//!
//! `MemoryTrailStore` is the in-process implementation used for tests and
//! replay mode. It also fans out trail change notifications on a broadcast
//! channel, which is the feed the multi-vehicle synchronizer consumes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use swathe_core::notify::{FootprintDelta, TrailChange};
use swathe_core::trail::{CommitFlags, TrailIncrement, TrailRecord, TrailState, TrailStats};
use swathe_core::types::{OperationId, TrailId, VehicleId};

/// Capacity of the change notification channel. A receiver that lags this
/// far behind gets a `Lagged` error and must mark its view partial.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Worth retrying with backoff
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Not worth retrying
    #[error("fatal store failure: {0}")]
    Fatal(String),
    /// The call did not complete within the configured timeout
    #[error("store call timed out")]
    Timeout,
    #[error("unknown trail {0}")]
    UnknownTrail(TrailId),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout)
    }
}

/// Backend trail store operations.
///
/// Implementations must be safe to retry: `commit_increment` with an
/// already-applied sequence number acknowledges without re-applying, and
/// `close_trail` on a closed trail is a no-op acknowledgment.
#[async_trait]
pub trait TrailStore: Send + Sync {
    /// Create a trail record, returning its assigned id.
    async fn open_trail(
        &self,
        vehicle: &VehicleId,
        operation: &OperationId,
        start_ms: u64,
        swath_width_m: f64,
    ) -> Result<TrailId, StoreError>;

    /// Persist one increment and publish it to the change stream.
    async fn commit_increment(
        &self,
        trail: &TrailId,
        increment: &TrailIncrement,
    ) -> Result<(), StoreError>;

    /// Finalize a trail: set its end time, freeze stats, publish `Closed`.
    async fn close_trail(
        &self,
        trail: &TrailId,
        end_ms: u64,
        stats: TrailStats,
        flags: CommitFlags,
    ) -> Result<(), StoreError>;

    /// Subscribe to the trail change notification stream.
    fn changes(&self) -> broadcast::Receiver<TrailChange>;

    async fn get_trail(&self, trail: &TrailId) -> Result<TrailRecord, StoreError>;

    async fn operation_trails(
        &self,
        operation: &OperationId,
    ) -> Result<Vec<TrailRecord>, StoreError>;
}

struct StoredTrail {
    record: TrailRecord,
    applied_seqs: HashSet<u64>,
}

struct Inner {
    next_id: u64,
    trails: HashMap<TrailId, StoredTrail>,
    /// Fault injection: fail this many upcoming mutating calls
    fail_next: u32,
    commits_applied: u64,
}

/// In-memory trail store with notification fan-out.
pub struct MemoryTrailStore {
    inner: Mutex<Inner>,
    changes_tx: broadcast::Sender<TrailChange>,
}

impl MemoryTrailStore {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MemoryTrailStore {
            inner: Mutex::new(Inner {
                next_id: 1,
                trails: HashMap::new(),
                fail_next: 0,
                commits_applied: 0,
            }),
            changes_tx,
        }
    }

    /// Make the next `n` mutating calls fail with a transient error.
    pub async fn inject_transient_failures(&self, n: u32) {
        self.inner.lock().await.fail_next = n;
    }

    /// Number of increments actually applied (idempotent replays excluded).
    pub async fn commits_applied(&self) -> u64 {
        self.inner.lock().await.commits_applied
    }

    fn publish(&self, change: TrailChange) {
        // No subscribers is fine; the synchronizer may not be running
        let _ = self.changes_tx.send(change);
    }
}

impl Default for MemoryTrailStore {
    fn default() -> Self {
        MemoryTrailStore::new()
    }
}

#[async_trait]
impl TrailStore for MemoryTrailStore {
    async fn open_trail(
        &self,
        vehicle: &VehicleId,
        operation: &OperationId,
        start_ms: u64,
        swath_width_m: f64,
    ) -> Result<TrailId, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(StoreError::Transient("injected failure".into()));
        }

        let id = TrailId(format!("trail-{}", inner.next_id));
        inner.next_id += 1;
        inner.trails.insert(
            id.clone(),
            StoredTrail {
                record: TrailRecord {
                    id: id.clone(),
                    vehicle: vehicle.clone(),
                    operation: operation.clone(),
                    state: TrailState::Active,
                    started_at: start_ms,
                    ended_at: None,
                    swath_width_m,
                    stats: TrailStats::default(),
                },
                applied_seqs: HashSet::new(),
            },
        );
        log::debug!("{}: opened for {} in {}", id, vehicle, operation);
        Ok(id)
    }

    async fn commit_increment(
        &self,
        trail: &TrailId,
        increment: &TrailIncrement,
    ) -> Result<(), StoreError> {
        let change = {
            let mut inner = self.inner.lock().await;
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                return Err(StoreError::Transient("injected failure".into()));
            }

            let stored = inner
                .trails
                .get_mut(trail)
                .ok_or_else(|| StoreError::UnknownTrail(trail.clone()))?;

            if !stored.applied_seqs.insert(increment.seq) {
                // Idempotent replay of an increment we already hold
                log::debug!("{}: replayed increment seq {}", trail, increment.seq);
                return Ok(());
            }

            stored
                .record
                .stats
                .apply(&increment.coverage, &increment.overlap);
            inner.commits_applied += 1;

            let stored = &inner.trails[trail];
            TrailChange::Extended {
                trail: trail.clone(),
                vehicle: stored.record.vehicle.clone(),
                operation: stored.record.operation.clone(),
                seq: increment.seq,
                delta: FootprintDelta::from_increment(&increment.coverage),
            }
        };
        self.publish(change);
        Ok(())
    }

    async fn close_trail(
        &self,
        trail: &TrailId,
        end_ms: u64,
        stats: TrailStats,
        flags: CommitFlags,
    ) -> Result<(), StoreError> {
        let change = {
            let mut inner = self.inner.lock().await;
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                return Err(StoreError::Transient("injected failure".into()));
            }

            let stored = inner
                .trails
                .get_mut(trail)
                .ok_or_else(|| StoreError::UnknownTrail(trail.clone()))?;

            if stored.record.state.is_terminal() {
                // Idempotent close replay
                return Ok(());
            }

            stored.record.state = if flags.contains(CommitFlags::ABORTED) {
                TrailState::Aborted
            } else {
                TrailState::Closed
            };
            stored.record.ended_at = Some(end_ms);
            stored.record.stats = stats;

            TrailChange::Closed {
                trail: trail.clone(),
                vehicle: stored.record.vehicle.clone(),
                operation: stored.record.operation.clone(),
            }
        };
        self.publish(change);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<TrailChange> {
        self.changes_tx.subscribe()
    }

    async fn get_trail(&self, trail: &TrailId) -> Result<TrailRecord, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .trails
            .get(trail)
            .map(|s| s.record.clone())
            .ok_or_else(|| StoreError::UnknownTrail(trail.clone()))
    }

    async fn operation_trails(
        &self,
        operation: &OperationId,
    ) -> Result<Vec<TrailRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<TrailRecord> = inner
            .trails
            .values()
            .filter(|s| &s.record.operation == operation)
            .map(|s| s.record.clone())
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swathe_core::coverage::CoverageAccumulator;
    use swathe_core::overlap::OverlapResult;
    use swathe_core::projection::{LocalProjection, METERS_PER_DEGREE_LATITUDE};
    use swathe_core::sample::GeoSample;
    use swathe_core::types::GeoPoint;

    fn make_increment(seq: u64) -> TrailIncrement {
        let anchor = GeoPoint::new(52.0, 5.0);
        let mut acc = CoverageAccumulator::new(LocalProjection::new(anchor), 10.0);
        let samples: Vec<GeoSample> = [0.0, 50.0]
            .iter()
            .enumerate()
            .map(|(i, m)| GeoSample {
                timestamp: 1000 + i as u64 * 1000,
                latitude: anchor.latitude + m / METERS_PER_DEGREE_LATITUDE,
                longitude: anchor.longitude,
                heading: 0.0,
                speed: 5.0,
            })
            .collect();
        let coverage = acc.derive(&samples);
        TrailIncrement {
            seq,
            samples,
            coverage,
            overlap: OverlapResult::none(),
            flags: CommitFlags::empty(),
        }
    }

    #[tokio::test]
    async fn test_open_and_get() {
        let store = MemoryTrailStore::new();
        let id = store
            .open_trail(&VehicleId::from("v-1"), &OperationId::from("op-1"), 1000, 10.0)
            .await
            .unwrap();

        let record = store.get_trail(&id).await.unwrap();
        assert_eq!(record.vehicle, VehicleId::from("v-1"));
        assert_eq!(record.state, TrailState::Active);
        assert_eq!(record.started_at, 1000);
        assert_eq!(record.ended_at, None);
    }

    #[tokio::test]
    async fn test_commit_replay_is_idempotent() {
        let store = MemoryTrailStore::new();
        let id = store
            .open_trail(&VehicleId::from("v-1"), &OperationId::from("op-1"), 1000, 10.0)
            .await
            .unwrap();

        let increment = make_increment(1);
        store.commit_increment(&id, &increment).await.unwrap();
        let once = store.get_trail(&id).await.unwrap().stats;

        // Same sequence number again: acknowledged, not re-applied
        store.commit_increment(&id, &increment).await.unwrap();
        let twice = store.get_trail(&id).await.unwrap().stats;

        assert_eq!(once, twice);
        assert_eq!(store.commits_applied().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_then_success() {
        let store = MemoryTrailStore::new();
        let id = store
            .open_trail(&VehicleId::from("v-1"), &OperationId::from("op-1"), 1000, 10.0)
            .await
            .unwrap();

        store.inject_transient_failures(2).await;
        let increment = make_increment(1);

        assert!(matches!(
            store.commit_increment(&id, &increment).await,
            Err(StoreError::Transient(_))
        ));
        assert!(store.commit_increment(&id, &increment).await.is_err());
        store.commit_increment(&id, &increment).await.unwrap();
        assert_eq!(store.commits_applied().await, 1);
    }

    #[tokio::test]
    async fn test_close_publishes_and_freezes() {
        let store = MemoryTrailStore::new();
        let mut changes = store.changes();
        let id = store
            .open_trail(&VehicleId::from("v-1"), &OperationId::from("op-1"), 1000, 10.0)
            .await
            .unwrap();

        let increment = make_increment(1);
        store.commit_increment(&id, &increment).await.unwrap();
        let stats = store.get_trail(&id).await.unwrap().stats;
        store
            .close_trail(&id, 9000, stats, CommitFlags::FINAL)
            .await
            .unwrap();

        let record = store.get_trail(&id).await.unwrap();
        assert_eq!(record.state, TrailState::Closed);
        assert_eq!(record.ended_at, Some(9000));

        assert!(matches!(
            changes.recv().await.unwrap(),
            TrailChange::Extended { .. }
        ));
        assert!(matches!(
            changes.recv().await.unwrap(),
            TrailChange::Closed { .. }
        ));

        // Closing again is an acknowledged no-op
        store
            .close_trail(&id, 9500, stats, CommitFlags::FINAL)
            .await
            .unwrap();
        assert_eq!(store.get_trail(&id).await.unwrap().ended_at, Some(9000));
    }

    #[tokio::test]
    async fn test_aborted_close() {
        let store = MemoryTrailStore::new();
        let id = store
            .open_trail(&VehicleId::from("v-1"), &OperationId::from("op-1"), 1000, 10.0)
            .await
            .unwrap();
        store
            .close_trail(&id, 2000, TrailStats::default(), CommitFlags::ABORTED)
            .await
            .unwrap();
        assert_eq!(
            store.get_trail(&id).await.unwrap().state,
            TrailState::Aborted
        );
    }
}
