//! Swathe Core
//!
//! Platform-independent engine for live field-coverage trail tracking:
//! as a vehicle works a field, its path is recorded as a swath-width trail,
//! swept into a covered-area footprint, and compared against previously
//! covered ground (its own and other vehicles') for overlap statistics.
//!
//! This crate is pure computation: no I/O, no async, no platform code. The
//! native runtime — store client, per-vehicle sessions, cross-vehicle
//! synchronization, REST API — lives in `swathe-server`.
//!
//! # Architecture
//!
//! - **sample**: validated position samples from the fleet feed
//! - **buffer**: FIFO accumulation between commit points
//! - **projection**: local projected plane per operation (meters)
//! - **coverage**: swath sweeping into footprint polygons + area/distance
//! - **overlap**: increment vs. prior-coverage intersection
//! - **trail**: lifecycle state machine, stats, commit records
//! - **notify**: cross-vehicle change-notification payloads
//! - **vehicle**: static vehicle capability table
//!
//! # Example
//!
//! ```rust,ignore
//! use swathe_core::coverage::{CoverageAccumulator, CoverageFootprint};
//! use swathe_core::overlap::compute_overlap;
//! use swathe_core::projection::LocalProjection;
//! use swathe_core::types::GeoPoint;
//!
//! let projection = LocalProjection::new(GeoPoint::new(52.0, 5.0));
//! let mut accumulator = CoverageAccumulator::new(projection, 10.0);
//! let mut footprint = CoverageFootprint::empty();
//!
//! let increment = accumulator.derive(&samples);
//! let overlap = compute_overlap(&increment, &[&footprint], false);
//! footprint.merge(&increment);
//! ```

pub mod buffer;
pub mod coverage;
pub mod notify;
pub mod overlap;
pub mod projection;
pub mod sample;
pub mod trail;
pub mod types;
pub mod vehicle;

pub use buffer::SampleBuffer;
pub use coverage::{CoverageAccumulator, CoverageFootprint, CoverageIncrement};
pub use notify::{FootprintDelta, TrailChange};
pub use overlap::{compute_overlap, OverlapResult};
pub use projection::LocalProjection;
pub use sample::{GeoSample, InvalidSample};
pub use trail::{
    AbortReason, CommitFlags, TrailIncrement, TrailMachine, TrailRecord, TrailState, TrailStats,
    TransitionError,
};
pub use types::{GeoPoint, Operation, OperationId, TrailId, VehicleId};
