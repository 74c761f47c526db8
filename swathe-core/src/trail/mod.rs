//! Trail Lifecycle
//!
//! A trail is one continuous recorded path of a vehicle within one
//! operation. This module holds the lifecycle state machine, the
//! accumulated statistics, and the commit record types exchanged with the
//! trail store.
//!
//! The state machine is pure: it validates transitions and tracks stats,
//! while all I/O (store acknowledgments, retries, timeouts) lives in the
//! server crate's session driver.

mod machine;

pub use machine::{TrailMachine, TransitionError};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageIncrement;
use crate::overlap::OverlapResult;
use crate::sample::GeoSample;
use crate::types::{OperationId, TrailId, VehicleId};

/// Lifecycle state of a trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailState {
    /// No trail open for this vehicle + operation
    Idle,
    /// Open request issued, awaiting store acknowledgment
    Opening,
    /// Acknowledged; accepting samples and periodic commits
    Active,
    /// Close requested, final flush in flight
    Closing,
    /// Terminal success
    Closed,
    /// Terminal failure or forced end
    Aborted,
}

impl Default for TrailState {
    fn default() -> Self {
        TrailState::Idle
    }
}

impl TrailState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrailState::Closed | TrailState::Aborted)
    }
}

impl std::fmt::Display for TrailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrailState::Idle => "idle",
            TrailState::Opening => "opening",
            TrailState::Active => "active",
            TrailState::Closing => "closing",
            TrailState::Closed => "closed",
            TrailState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Why a trail was forced to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Store never acknowledged the open request
    OpenFailed,
    /// Buffered samples exceeded the hard bound
    BufferOverflow,
    /// Commit retry budget exhausted
    CommitFailed,
    /// Vehicle was deassigned from the operation
    Deassigned,
    /// The operation ended while the trail was open
    OperationEnded,
    /// Sustained connectivity loss beyond the timeout
    ConnectivityLost,
    /// Caller cancelled before the trail became active
    Cancelled,
    /// Process shutdown
    Shutdown,
}

bitflags! {
    /// Flags on a commit record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommitFlags: u32 {
        /// Final commit of a closing trail
        const FINAL = 0x01;
        /// Overlap was computed against an incomplete prior view
        const PARTIAL_OVERLAP = 0x02;
        /// Resend of an increment after a transient failure
        const REPLAYED = 0x04;
        /// Close record of an aborted trail
        const ABORTED = 0x08;
    }
}

// On the wire the flags travel as their raw bits; unknown bits from a
// newer peer are dropped rather than rejected.
impl Serialize for CommitFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for CommitFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(CommitFlags::from_bits_truncate)
    }
}

/// Accumulated statistics of one trail.
///
/// Distance and covered area are monotonically non-decreasing while the
/// trail is active; self-overlapping ground counts once per pass here.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailStats {
    /// Path length in meters
    pub distance_m: f64,
    /// Swept area in m²
    pub covered_m2: f64,
    /// Area that intersected previously covered ground, in m²
    pub overlap_m2: f64,
    /// `overlap_m2 / covered_m2`, 0 when nothing is covered
    pub overlap_fraction: f64,
}

impl TrailStats {
    pub fn covered_ha(&self) -> f64 {
        self.covered_m2 / 10_000.0
    }

    pub fn overlap_ha(&self) -> f64 {
        self.overlap_m2 / 10_000.0
    }

    /// Fold one commit's deltas in. Negative deltas are ignored so the
    /// monotonicity invariant holds no matter what the caller derived.
    pub fn apply(&mut self, increment: &CoverageIncrement, overlap: &OverlapResult) {
        self.distance_m += increment.distance_m.max(0.0);
        self.covered_m2 += increment.area_m2.max(0.0);
        self.overlap_m2 += overlap.area_m2.max(0.0);
        self.overlap_fraction = if self.covered_m2 > 0.0 {
            (self.overlap_m2 / self.covered_m2).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

/// One increment as sent to the trail store.
///
/// `seq` is the client-generated sequence number; the store must treat a
/// replayed number as an acknowledged no-op so retries never double-count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailIncrement {
    pub seq: u64,
    pub samples: Vec<GeoSample>,
    pub coverage: CoverageIncrement,
    pub overlap: OverlapResult,
    pub flags: CommitFlags,
}

/// A trail as seen through the store API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailRecord {
    pub id: TrailId,
    pub vehicle: VehicleId,
    pub operation: OperationId,
    pub state: TrailState,
    /// Unix ms; set on open
    pub started_at: u64,
    /// Unix ms; null iff the trail is non-terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub swath_width_m: f64,
    pub stats: TrailStats,
}
