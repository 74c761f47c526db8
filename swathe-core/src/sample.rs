//! Position Samples
//!
//! A `GeoSample` is a single timestamped position reading from the fleet
//! position feed. Samples are validated on entry to the buffer; a rejected
//! sample is dropped and never retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single timestamped position + heading + speed reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSample {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Heading in degrees (0-360, clockwise from north)
    pub heading: f64,
    /// Speed over ground in meters per second
    pub speed: f64,
}

/// Reasons a sample is rejected at the buffer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidSample {
    /// A coordinate, heading or speed is NaN or infinite
    #[error("non-finite {field}")]
    NonFinite { field: &'static str },
    /// Latitude outside [-90, 90] or longitude outside [-180, 180]
    #[error("{field} {value} out of range")]
    OutOfRange { field: &'static str, value: f64 },
    /// Timestamp not strictly after the last accepted sample
    #[error("timestamp {got} not after {last}")]
    OutOfOrder { last: u64, got: u64 },
}

impl GeoSample {
    /// Validate everything except timestamp ordering, which only the
    /// buffer can check.
    pub fn validate(&self) -> Result<(), InvalidSample> {
        for (field, value) in [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("heading", self.heading),
            ("speed", self.speed),
        ] {
            if !value.is_finite() {
                return Err(InvalidSample::NonFinite { field });
            }
        }
        if self.latitude.abs() > 90.0 {
            return Err(InvalidSample::OutOfRange {
                field: "latitude",
                value: self.latitude,
            });
        }
        if self.longitude.abs() > 180.0 {
            return Err(InvalidSample::OutOfRange {
                field: "longitude",
                value: self.longitude,
            });
        }
        Ok(())
    }

    /// The sample's position as a `geo` point (x = longitude, y = latitude).
    pub fn point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}
