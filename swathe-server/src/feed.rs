//! Position Feed
//!
//! Live samples arrive through the REST surface; this module holds the
//! shared wire type and the replay feed, which plays back a recorded
//! JSON-lines capture for development without vehicles in the field.
//!
//! The feed is at-least-once: duplicates and regressions are rejected at
//! the buffer boundary, and a dropped sample is recovered by the vehicle's
//! next report.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_graceful_shutdown::SubsystemHandle;

use swathe_core::sample::GeoSample;
use swathe_core::types::{OperationId, VehicleId};
use swathe_core::vehicle::{profile, VehicleKind};

use crate::fleet::Fleet;
use crate::TrackerError;

/// One feed report as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSample {
    pub vehicle: VehicleId,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed: f64,
    /// Implement swath width override in meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swath_width_m: Option<f64>,
    /// Vehicle kind for profile lookup when no width is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FeedSample {
    pub fn sample(&self) -> GeoSample {
        GeoSample {
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            heading: self.heading,
            speed: self.speed,
        }
    }

    /// Swath width for auto-opened trails: explicit override, else the
    /// vehicle kind's profile default, else the tractor default.
    pub fn swath_width(&self) -> f64 {
        if let Some(width) = self.swath_width_m {
            return width;
        }
        let kind = self
            .kind
            .as_deref()
            .and_then(VehicleKind::parse)
            .unwrap_or(VehicleKind::Tractor);
        profile(kind).default_swath_m
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub dispatched: usize,
    pub skipped: usize,
}

/// Plays a recorded JSON-lines capture through the fleet, auto-opening a
/// trail per vehicle, then closes everything and requests shutdown.
pub struct ReplayFeed {
    fleet: Arc<Fleet>,
    path: PathBuf,
    operation: OperationId,
}

impl ReplayFeed {
    pub fn new(fleet: Arc<Fleet>, path: PathBuf, operation: OperationId) -> Self {
        ReplayFeed {
            fleet,
            path,
            operation,
        }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), TrackerError> {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                log::debug!("replay: shutdown");
                return Ok(());
            },
            result = self.replay() => match result {
                Ok(stats) => log::info!(
                    "replay: {} samples dispatched, {} skipped",
                    stats.dispatched,
                    stats.skipped
                ),
                Err(e) => log::error!("replay: {}", e),
            },
        }
        subsys.request_shutdown();
        Ok(())
    }

    /// Feed the capture through the fleet and close all opened trails.
    pub async fn replay(&self) -> Result<ReplayStats, TrackerError> {
        log::info!("replay: reading {}", self.path.display());
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut stats = ReplayStats::default();
        let mut opened: HashSet<VehicleId> = HashSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let report: FeedSample = match serde_json::from_str(line) {
                Ok(report) => report,
                Err(e) => {
                    log::warn!("replay: bad line skipped: {}", e);
                    stats.skipped += 1;
                    continue;
                }
            };

            if !opened.contains(&report.vehicle) {
                self.fleet.open_trail(
                    report.vehicle.clone(),
                    self.operation.clone(),
                    report.swath_width(),
                )?;
                opened.insert(report.vehicle.clone());
            }
            match self.fleet.route_sample(&report.vehicle, report.sample()) {
                Ok(()) => stats.dispatched += 1,
                Err(e) => {
                    // Session aborted mid-replay (e.g. overflow); skip the
                    // rest of this vehicle's samples
                    log::warn!("replay: {}", e);
                    stats.skipped += 1;
                }
            }
        }

        for vehicle in &opened {
            if let Err(e) = self.fleet.close_trail(vehicle) {
                log::debug!("replay: {}", e);
            }
        }
        self.wait_for_drain().await;
        Ok(stats)
    }

    /// Wait for the closed sessions to finish their final commits.
    async fn wait_for_drain(&self) {
        for _ in 0..100 {
            if self.fleet.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        log::warn!(
            "replay: {} sessions still draining",
            self.fleet.active_count()
        );
    }
}
