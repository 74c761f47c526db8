//! Shared Identifier and Context Types
//!
//! Identifiers are opaque strings assigned by external systems (the fleet
//! feed for vehicles, the trail store for trails). The engine never
//! interprets their contents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a vehicle, assigned by the fleet position feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

/// Identifier of an operation (a bounded work session on one map).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

/// Identifier of a trail, assigned by the trail store on open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrailId(pub String);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        VehicleId(s.to_string())
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        OperationId(s.to_string())
    }
}

impl From<&str> for TrailId {
    fn from(s: &str) -> Self {
        TrailId(s.to_string())
    }
}

/// A geographic reference point, used as the projection anchor of an
/// operation. All trails of one operation share this anchor so their
/// footprints live in the same projected plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }
}

/// Static context of an operation.
///
/// The anchor is fixed at operation creation; every footprint exchanged
/// between vehicles of this operation is expressed in the plane it defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub anchor: GeoPoint,
}

impl Operation {
    pub fn new(id: OperationId, anchor: GeoPoint) -> Self {
        Operation { id, anchor }
    }
}
