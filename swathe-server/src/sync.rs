//! Multi-Vehicle Synchronizer
//!
//! Maintains the read-model of other vehicles' coverage per operation,
//! refreshed from the store's trail change notifications. Readers take
//! point-in-time snapshots and are never blocked by writers: each update
//! clones the operation view, mutates the clone, and swaps the `Arc`, so a
//! snapshot taken mid-update still sees a consistent older view.
//!
//! The synchronizer never feeds errors into the commit path. If it has
//! fallen behind (channel lag) or never ran, snapshots say so via
//! `partial` and overlap is computed against what is visible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio_graceful_shutdown::SubsystemHandle;

use swathe_core::coverage::CoverageFootprint;
use swathe_core::notify::TrailChange;
use swathe_core::types::{OperationId, TrailId, VehicleId};

use crate::{now_ms, TrackerError};

/// Coverage of one trail as seen through notifications.
#[derive(Debug, Clone)]
pub struct TrailCoverage {
    pub vehicle: VehicleId,
    pub footprint: CoverageFootprint,
    pub closed: bool,
    /// Highest increment sequence folded in, for staleness diagnostics
    pub last_seq: u64,
}

/// Immutable view of all known coverage in one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationView {
    pub trails: HashMap<TrailId, TrailCoverage>,
    pub version: u64,
    pub updated_ms: u64,
}

/// Point-in-time snapshot for one overlap computation.
#[derive(Debug, Clone)]
pub struct CoverageSnapshot {
    view: Arc<OperationView>,
    /// True when the synchronizer is known to be behind or absent
    pub partial: bool,
}

impl CoverageSnapshot {
    /// Footprints to treat as prior coverage, excluding the local trail
    /// (its own increments are tracked locally with full fidelity).
    pub fn prior_footprints(&self, exclude: Option<&TrailId>) -> Vec<&CoverageFootprint> {
        self.view
            .trails
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(_, coverage)| &coverage.footprint)
            .collect()
    }

    pub fn version(&self) -> u64 {
        self.view.version
    }

    pub fn updated_ms(&self) -> u64 {
        self.view.updated_ms
    }

    pub fn trail_count(&self) -> usize {
        self.view.trails.len()
    }
}

/// Shared handle for taking snapshots.
#[derive(Clone, Default)]
pub struct SyncView {
    model: Arc<RwLock<HashMap<OperationId, Arc<OperationView>>>>,
    healthy: Arc<AtomicBool>,
}

impl SyncView {
    /// Snapshot the current view of one operation. Cheap: clones an `Arc`.
    pub fn snapshot(&self, operation: &OperationId) -> CoverageSnapshot {
        let view = self
            .model
            .read()
            .unwrap()
            .get(operation)
            .cloned()
            .unwrap_or_default();
        CoverageSnapshot {
            view,
            partial: !self.healthy.load(Ordering::Acquire),
        }
    }

    fn apply(&self, change: &TrailChange) {
        let mut model = self.model.write().unwrap();
        let entry = model.entry(change.operation().clone()).or_default();

        // Copy-on-write: mutate a clone, then swap the Arc
        let mut view = (**entry).clone();
        match change {
            TrailChange::Extended {
                trail,
                vehicle,
                seq,
                delta,
                ..
            } => {
                let coverage = view.trails.entry(trail.clone()).or_insert_with(|| {
                    TrailCoverage {
                        vehicle: vehicle.clone(),
                        footprint: CoverageFootprint::empty(),
                        closed: false,
                        last_seq: 0,
                    }
                });
                if *seq > coverage.last_seq {
                    delta.apply_to(&mut coverage.footprint);
                    coverage.last_seq = *seq;
                }
            }
            TrailChange::Closed { trail, .. } => {
                // Closed trails stay: their ground remains covered
                if let Some(coverage) = view.trails.get_mut(trail) {
                    coverage.closed = true;
                }
            }
        }
        view.version += 1;
        view.updated_ms = now_ms();
        *entry = Arc::new(view);
    }
}

/// Ingest loop turning change notifications into the read-model.
pub struct TrailSyncer {
    view: SyncView,
    changes_rx: broadcast::Receiver<TrailChange>,
}

impl TrailSyncer {
    pub fn new(changes_rx: broadcast::Receiver<TrailChange>) -> Self {
        TrailSyncer {
            view: SyncView::default(),
            changes_rx,
        }
    }

    pub fn view(&self) -> SyncView {
        self.view.clone()
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), TrackerError> {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                log::debug!("sync: shutdown");
                Ok(())
            },
            result = self.ingest() => result,
        }
    }

    /// Consume the change stream until it closes.
    pub async fn ingest(mut self) -> Result<(), TrackerError> {
        log::debug!("sync: ingesting trail changes");
        self.view.healthy.store(true, Ordering::Release);

        loop {
            match self.changes_rx.recv().await {
                Ok(change) => {
                    self.view.apply(&change);
                    self.view.healthy.store(true, Ordering::Release);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Snapshots are partial until we catch up
                    log::warn!("sync: lagged, {} notifications missed", missed);
                    self.view.healthy.store(false, Ordering::Release);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("sync: change stream closed");
                    self.view.healthy.store(false, Ordering::Release);
                    return Ok(());
                }
            }
        }
    }
}
