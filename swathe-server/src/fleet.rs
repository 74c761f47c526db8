//! Fleet Registry
//!
//! Owns the per-vehicle trail sessions. Exactly one non-terminal trail may
//! exist per (vehicle, operation) pair — and a vehicle belongs to one
//! operation at a time — so the registry is keyed by vehicle and a second
//! open request is a conflict until the first session ends.
//!
//! Sessions run as plain tasks under a `TaskTracker`; the fleet subsystem
//! propagates shutdown by cancelling the root token and waiting for the
//! tracker to drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use swathe_core::sample::GeoSample;
use swathe_core::trail::AbortReason;
use swathe_core::types::{GeoPoint, Operation, OperationId, VehicleId};

use crate::session::{SessionCommand, SessionConfig, TrailSession};
use crate::store::TrailStore;
use crate::sync::SyncView;
use crate::TrackerError;

/// Per-vehicle feed channel depth. The session drains continuously; a full
/// channel means the session is wedged in a long retry, and dropping feed
/// samples there is preferable to unbounded queueing.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Anchor points of known operations. The first sample seen for an
/// operation fixes its anchor; every vehicle of the operation projects
/// into the same plane.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    anchors: Arc<Mutex<HashMap<OperationId, GeoPoint>>>,
}

impl OperationRegistry {
    pub fn anchor_or_insert(&self, operation: &OperationId, candidate: GeoPoint) -> GeoPoint {
        *self
            .anchors
            .lock()
            .unwrap()
            .entry(operation.clone())
            .or_insert(candidate)
    }

    pub fn anchor(&self, operation: &OperationId) -> Option<GeoPoint> {
        self.anchors.lock().unwrap().get(operation).copied()
    }

    /// Full operation context, once its anchor is known.
    pub fn operation(&self, id: &OperationId) -> Option<Operation> {
        self.anchor(id).map(|anchor| Operation::new(id.clone(), anchor))
    }
}

struct FleetEntry {
    id: u64,
    operation: OperationId,
    sample_tx: mpsc::Sender<GeoSample>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    close_cancel: CancellationToken,
}

/// Registry and supervisor of all trail sessions.
pub struct Fleet {
    config: SessionConfig,
    store: Arc<dyn TrailStore>,
    sync: SyncView,
    operations: OperationRegistry,
    entries: Mutex<HashMap<VehicleId, FleetEntry>>,
    next_entry: Mutex<u64>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Fleet {
    pub fn new(config: SessionConfig, store: Arc<dyn TrailStore>, sync: SyncView) -> Arc<Fleet> {
        Arc::new(Fleet {
            config,
            store,
            sync,
            operations: OperationRegistry::default(),
            entries: Mutex::new(HashMap::new()),
            next_entry: Mutex::new(1),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// Start a trail for a vehicle. Fails with `Conflict` while the
    /// vehicle already has a non-terminal trail.
    pub fn open_trail(
        self: &Arc<Self>,
        vehicle: VehicleId,
        operation: OperationId,
        swath_width_m: f64,
    ) -> Result<(), TrackerError> {
        if self.shutdown.is_cancelled() {
            return Err(TrackerError::Shutdown);
        }

        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&vehicle) {
            if !entry.sample_tx.is_closed() {
                return Err(TrackerError::Conflict {
                    vehicle,
                    operation: entry.operation.clone(),
                });
            }
        }

        let id = {
            let mut next = self.next_entry.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let close_cancel = CancellationToken::new();

        let session = TrailSession::new(
            vehicle.clone(),
            operation.clone(),
            swath_width_m,
            self.config.clone(),
            self.store.clone(),
            self.sync.clone(),
            self.operations.clone(),
            sample_rx,
            cmd_rx,
            close_cancel.clone(),
            self.shutdown.child_token(),
        );

        entries.insert(
            vehicle.clone(),
            FleetEntry {
                id,
                operation,
                sample_tx,
                cmd_tx,
                close_cancel,
            },
        );
        drop(entries);

        let fleet = Arc::clone(self);
        let _ = self.tracker.spawn(async move {
            match session.run().await {
                Ok(()) => {}
                Err(TrackerError::Shutdown) => {
                    log::debug!("{}: session stopped by shutdown", vehicle)
                }
                Err(e) => log::error!("{}: session failed: {}", vehicle, e),
            }
            fleet.release(&vehicle, id);
        });
        Ok(())
    }

    /// Route a feed sample to the vehicle's session.
    pub fn route_sample(&self, vehicle: &VehicleId, sample: GeoSample) -> Result<(), TrackerError> {
        let entries = self.entries.lock().unwrap();
        match entries.get(vehicle) {
            Some(entry) if !entry.sample_tx.is_closed() => {
                if entry.sample_tx.try_send(sample).is_err() {
                    // At-least-once feed: drop here, the vehicle keeps sending
                    log::warn!("{}: feed backlog, sample dropped", vehicle);
                }
                Ok(())
            }
            _ => Err(TrackerError::NoActiveTrail(vehicle.clone())),
        }
    }

    /// Request a graceful close of the vehicle's trail. Cancels an
    /// in-flight non-final commit retry for that trail only.
    pub fn close_trail(&self, vehicle: &VehicleId) -> Result<(), TrackerError> {
        let entries = self.entries.lock().unwrap();
        match entries.get(vehicle) {
            Some(entry) if !entry.cmd_tx.is_closed() => {
                entry.close_cancel.cancel();
                if entry.cmd_tx.try_send(SessionCommand::Close).is_err() {
                    log::debug!("{}: close already in progress", vehicle);
                }
                Ok(())
            }
            _ => Err(TrackerError::NoActiveTrail(vehicle.clone())),
        }
    }

    /// Force-abort the vehicle's trail (deassignment, operation end,
    /// sustained connectivity loss).
    pub fn abort_trail(
        &self,
        vehicle: &VehicleId,
        reason: AbortReason,
    ) -> Result<(), TrackerError> {
        let entries = self.entries.lock().unwrap();
        match entries.get(vehicle) {
            Some(entry) if !entry.cmd_tx.is_closed() => {
                if entry.cmd_tx.try_send(SessionCommand::Abort(reason)).is_err() {
                    log::debug!("{}: abort racing an ending session", vehicle);
                }
                Ok(())
            }
            _ => Err(TrackerError::NoActiveTrail(vehicle.clone())),
        }
    }

    /// Operation the vehicle is currently working, if it has an open trail.
    pub fn active_operation(&self, vehicle: &VehicleId) -> Option<OperationId> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(vehicle)
            .filter(|e| !e.sample_tx.is_closed())
            .map(|e| e.operation.clone())
    }

    pub fn active_count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter(|e| !e.sample_tx.is_closed())
            .count()
    }

    fn release(&self, vehicle: &VehicleId, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        // Only remove our own entry; the vehicle may have reopened already
        if entries.get(vehicle).map(|e| e.id) == Some(id) {
            entries.remove(vehicle);
        }
    }

    /// Subsystem body: wait for shutdown, then stop all sessions.
    pub async fn run(self: Arc<Fleet>, subsys: SubsystemHandle) -> Result<(), TrackerError> {
        subsys.on_shutdown_requested().await;
        log::debug!("fleet: shutdown, stopping {} sessions", self.active_count());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }
}
