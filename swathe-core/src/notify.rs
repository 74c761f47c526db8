//! Trail Change Notifications
//!
//! Payload types for the cross-vehicle notification stream. The footprint
//! delta is the polygon set of one committed increment, expressed in the
//! operation's projected plane, so a receiver can fold it into its
//! read-model without re-deriving geometry from samples.
//!
//! Payloads are bincode-encoded for transport; the envelope (transport
//! framing, topics) belongs to the store implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coverage::{CoverageFootprint, CoverageIncrement};
use crate::types::{OperationId, TrailId, VehicleId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] bincode::Error),
}

/// Polygon set of one committed increment, in the operation plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintDelta {
    polygons: geo_types::MultiPolygon<f64>,
    pub area_m2: f64,
}

impl FootprintDelta {
    pub fn from_increment(increment: &CoverageIncrement) -> Self {
        FootprintDelta {
            polygons: increment.polygons().clone(),
            area_m2: increment.area_m2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }

    /// Fold this delta into a footprint held by a read-model.
    pub fn apply_to(&self, footprint: &mut CoverageFootprint) {
        footprint.merge_footprint(&CoverageFootprint::from_polygons(self.polygons.clone()));
    }
}

/// One event on the trail change stream.
///
/// Externally tagged: bincode cannot round-trip internally tagged enums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrailChange {
    /// A trail gained a committed increment
    Extended {
        trail: TrailId,
        vehicle: VehicleId,
        operation: OperationId,
        seq: u64,
        delta: FootprintDelta,
    },
    /// A trail reached a terminal state; its footprint stays covered ground
    Closed {
        trail: TrailId,
        vehicle: VehicleId,
        operation: OperationId,
    },
}

impl TrailChange {
    pub fn operation(&self) -> &OperationId {
        match self {
            TrailChange::Extended { operation, .. } => operation,
            TrailChange::Closed { operation, .. } => operation,
        }
    }

    pub fn vehicle(&self) -> &VehicleId {
        match self {
            TrailChange::Extended { vehicle, .. } => vehicle,
            TrailChange::Closed { vehicle, .. } => vehicle,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, NotifyError> {
        bincode::serialize(self).map_err(NotifyError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NotifyError> {
        bincode::deserialize(bytes).map_err(NotifyError::Decode)
    }
}
