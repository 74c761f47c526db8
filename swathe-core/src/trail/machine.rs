//! Trail State Machine
//!
//! Pure per-trail lifecycle controller. Each instance belongs to exactly one
//! (vehicle, operation) pair and is single-writer: only the owning session
//! drives it. The machine validates transitions and tracks stats; it knows
//! nothing of stores, retries or clocks beyond the timestamps it is handed.

use thiserror::Error;

use crate::coverage::CoverageIncrement;
use crate::overlap::OverlapResult;
use crate::types::{OperationId, TrailId, VehicleId};

use super::{AbortReason, TrailState, TrailStats};

/// A transition was requested from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {event} from state {state}")]
pub struct TransitionError {
    pub state: TrailState,
    pub event: &'static str,
}

/// Lifecycle controller for one trail.
#[derive(Debug, Clone)]
pub struct TrailMachine {
    vehicle: VehicleId,
    operation: OperationId,
    state: TrailState,
    trail_id: Option<TrailId>,
    started_at: Option<u64>,
    ended_at: Option<u64>,
    stats: TrailStats,
    /// Sequence number of the next increment; advances only on a
    /// successful commit so retries replay the same number.
    next_seq: u64,
    abort_reason: Option<AbortReason>,
}

impl TrailMachine {
    pub fn new(vehicle: VehicleId, operation: OperationId) -> Self {
        TrailMachine {
            vehicle,
            operation,
            state: TrailState::Idle,
            trail_id: None,
            started_at: None,
            ended_at: None,
            stats: TrailStats::default(),
            next_seq: 1,
            abort_reason: None,
        }
    }

    pub fn vehicle(&self) -> &VehicleId {
        &self.vehicle
    }

    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    pub fn state(&self) -> TrailState {
        self.state
    }

    pub fn trail_id(&self) -> Option<&TrailId> {
        self.trail_id.as_ref()
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Null iff the trail is non-terminal.
    pub fn ended_at(&self) -> Option<u64> {
        self.ended_at
    }

    pub fn stats(&self) -> &TrailStats {
        &self.stats
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            state: self.state,
            event,
        }
    }

    /// Idle → Opening: an open request is being issued to the store.
    pub fn start(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        if self.state != TrailState::Idle {
            return Err(self.invalid("start"));
        }
        self.state = TrailState::Opening;
        self.started_at = Some(now_ms);
        Ok(())
    }

    /// Opening → Active: the store acknowledged and assigned an id.
    pub fn opened(&mut self, trail_id: TrailId) -> Result<(), TransitionError> {
        if self.state != TrailState::Opening {
            return Err(self.invalid("opened"));
        }
        self.trail_id = Some(trail_id);
        self.state = TrailState::Active;
        Ok(())
    }

    /// Opening → Aborted: the open request ultimately failed.
    pub fn open_failed(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        if self.state != TrailState::Opening {
            return Err(self.invalid("open_failed"));
        }
        self.state = TrailState::Aborted;
        self.abort_reason = Some(AbortReason::OpenFailed);
        self.ended_at = Some(now_ms);
        Ok(())
    }

    /// The sequence number the next commit must carry. A retried commit
    /// sees the same number until `commit_applied` advances it.
    pub fn commit_seq(&self) -> Result<u64, TransitionError> {
        match self.state {
            TrailState::Active | TrailState::Closing => Ok(self.next_seq),
            _ => Err(self.invalid("commit")),
        }
    }

    /// A commit was acknowledged by the store: fold its stats in and
    /// advance the sequence number. Active stays Active; Closing stays
    /// Closing until `close_completed`.
    pub fn commit_applied(
        &mut self,
        increment: &CoverageIncrement,
        overlap: &OverlapResult,
    ) -> Result<(), TransitionError> {
        match self.state {
            TrailState::Active | TrailState::Closing => {
                self.stats.apply(increment, overlap);
                self.next_seq += 1;
                Ok(())
            }
            _ => Err(self.invalid("commit_applied")),
        }
    }

    /// Active → Closing: close requested, final flush in flight.
    pub fn close_requested(&mut self) -> Result<(), TransitionError> {
        if self.state != TrailState::Active {
            return Err(self.invalid("close"));
        }
        self.state = TrailState::Closing;
        Ok(())
    }

    /// Closing → Closed: final commit acknowledged, stats frozen.
    pub fn close_completed(&mut self, end_ms: u64) -> Result<(), TransitionError> {
        if self.state != TrailState::Closing {
            return Err(self.invalid("close_completed"));
        }
        self.state = TrailState::Closed;
        self.ended_at = Some(end_ms);
        Ok(())
    }

    /// Opening | Active | Closing → Aborted. Partial stats are preserved.
    pub fn abort(&mut self, reason: AbortReason, end_ms: u64) -> Result<(), TransitionError> {
        match self.state {
            TrailState::Opening | TrailState::Active | TrailState::Closing => {
                self.state = TrailState::Aborted;
                self.abort_reason = Some(reason);
                self.ended_at = Some(end_ms);
                Ok(())
            }
            _ => Err(self.invalid("abort")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageAccumulator, CoverageFootprint};
    use crate::projection::{LocalProjection, METERS_PER_DEGREE_LATITUDE};
    use crate::sample::GeoSample;
    use crate::types::GeoPoint;

    fn machine() -> TrailMachine {
        TrailMachine::new(VehicleId::from("tractor-1"), OperationId::from("op-1"))
    }

    fn increment() -> (CoverageIncrement, OverlapResult) {
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
        let mut footprint = CoverageFootprint::empty();
        let inc = acc.extend(&mut footprint, &samples);
        (inc, OverlapResult::none())
    }

    #[test]
    fn test_happy_path() {
        let mut m = machine();
        assert_eq!(m.state(), TrailState::Idle);

        m.start(1000).unwrap();
        assert_eq!(m.state(), TrailState::Opening);
        assert_eq!(m.started_at(), Some(1000));
        assert_eq!(m.ended_at(), None);

        m.opened(TrailId::from("t-1")).unwrap();
        assert_eq!(m.state(), TrailState::Active);
        assert_eq!(m.ended_at(), None);

        let (inc, ovl) = increment();
        assert_eq!(m.commit_seq().unwrap(), 1);
        m.commit_applied(&inc, &ovl).unwrap();
        assert_eq!(m.state(), TrailState::Active);
        assert_eq!(m.commit_seq().unwrap(), 2);

        m.close_requested().unwrap();
        assert_eq!(m.state(), TrailState::Closing);
        m.commit_applied(&inc, &ovl).unwrap();
        m.close_completed(9000).unwrap();
        assert_eq!(m.state(), TrailState::Closed);
        assert_eq!(m.ended_at(), Some(9000));
        assert!(m.is_terminal());
    }

    #[test]
    fn test_seq_stable_until_applied() {
        let mut m = machine();
        m.start(0).unwrap();
        m.opened(TrailId::from("t-1")).unwrap();

        // A failed commit retries with the same sequence number
        assert_eq!(m.commit_seq().unwrap(), 1);
        assert_eq!(m.commit_seq().unwrap(), 1);

        let (inc, ovl) = increment();
        m.commit_applied(&inc, &ovl).unwrap();
        assert_eq!(m.commit_seq().unwrap(), 2);
    }

    #[test]
    fn test_stats_accumulate_monotonically() {
        let mut m = machine();
        m.start(0).unwrap();
        m.opened(TrailId::from("t-1")).unwrap();

        let (inc, ovl) = increment();
        m.commit_applied(&inc, &ovl).unwrap();
        let first = *m.stats();
        m.commit_applied(&inc, &ovl).unwrap();
        let second = *m.stats();

        assert!(second.distance_m > first.distance_m);
        assert!(second.covered_m2 > first.covered_m2);
    }

    #[test]
    fn test_open_failure_aborts() {
        let mut m = machine();
        m.start(0).unwrap();
        m.open_failed(500).unwrap();
        assert_eq!(m.state(), TrailState::Aborted);
        assert_eq!(m.abort_reason(), Some(AbortReason::OpenFailed));
        assert_eq!(m.ended_at(), Some(500));
    }

    #[test]
    fn test_abort_preserves_partial_stats() {
        let mut m = machine();
        m.start(0).unwrap();
        m.opened(TrailId::from("t-1")).unwrap();
        let (inc, ovl) = increment();
        m.commit_applied(&inc, &ovl).unwrap();
        let stats = *m.stats();

        m.abort(AbortReason::BufferOverflow, 5000).unwrap();
        assert_eq!(m.state(), TrailState::Aborted);
        assert_eq!(*m.stats(), stats);
        assert_eq!(m.ended_at(), Some(5000));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut m = machine();

        // Can't open or commit before start
        assert!(m.opened(TrailId::from("t-1")).is_err());
        assert!(m.commit_seq().is_err());
        assert!(m.close_requested().is_err());
        assert!(m.abort(AbortReason::Shutdown, 0).is_err());

        m.start(0).unwrap();
        // Can't commit while opening
        assert!(m.commit_seq().is_err());
        // Can't start twice
        let err = m.start(0).unwrap_err();
        assert_eq!(err.state, TrailState::Opening);
        assert_eq!(err.event, "start");

        m.opened(TrailId::from("t-1")).unwrap();
        m.close_requested().unwrap();
        m.close_completed(100).unwrap();

        // Terminal states accept nothing
        let (inc, ovl) = increment();
        assert!(m.commit_applied(&inc, &ovl).is_err());
        assert!(m.abort(AbortReason::Shutdown, 0).is_err());
    }
}
