//! Per-cycle zone occupancy latching
//!
//! Each cycle starts from an all-clear working buffer. Valid targets OR their
//! zone matches into it, and `commit` publishes the buffer as the new state
//! in one step. Nothing carries over from earlier cycles: a cycle with no
//! valid target commits all zones clear.

use crate::domain::types::{OccupancyState, RadarTarget, Zone, ZoneMatches, ZONE_COUNT};
use crate::services::classifier::classify;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct OccupancyStateMachine {
    working: OccupancyState,
    committed: OccupancyState,
}

impl OccupancyStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_cycle(&mut self) {
        self.working = OccupancyState::default();
    }

    /// Classify one target against `zones` and latch its matches.
    /// Invalid targets are skipped and match nothing.
    pub fn accumulate(&mut self, target: &RadarTarget, zones: &[Zone; ZONE_COUNT]) -> ZoneMatches {
        if !target.valid {
            return ZoneMatches::new();
        }

        let matches = classify(target.semantic_position(), zones);
        for &zone in &matches {
            debug!("TARGET ID={} is within {}", target.id(), zone);
            self.working.mark(zone);
        }
        matches
    }

    /// Publish the working buffer and return the new committed state
    pub fn commit(&mut self) -> OccupancyState {
        if self.working != self.committed {
            info!(from = %self.committed, to = %self.working, "occupancy_changed");
        }
        self.committed = self.working;
        self.committed
    }

    pub fn committed(&self) -> OccupancyState {
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ZoneIndex, DEFAULT_ZONES};

    fn valid_target(slot: usize, x: i16, y: i16) -> RadarTarget {
        RadarTarget { x, y, valid: true, ..RadarTarget::empty(slot) }
    }

    #[test]
    fn test_valid_target_latches_zone() {
        let mut occupancy = OccupancyStateMachine::new();
        occupancy.begin_cycle();
        occupancy.accumulate(&valid_target(0, -2000, 2000), &DEFAULT_ZONES);

        let state = occupancy.commit();

        assert_eq!(state.flags(), [true, false, false]);
    }

    #[test]
    fn test_invalid_target_contributes_nothing() {
        let mut occupancy = OccupancyStateMachine::new();
        occupancy.begin_cycle();
        let target = RadarTarget { valid: false, ..valid_target(0, -2000, 2000) };

        assert!(occupancy.accumulate(&target, &DEFAULT_ZONES).is_empty());
        assert!(!occupancy.commit().any());
    }

    #[test]
    fn test_targets_are_or_accumulated() {
        let mut occupancy = OccupancyStateMachine::new();
        occupancy.begin_cycle();
        occupancy.accumulate(&valid_target(0, -2000, 2000), &DEFAULT_ZONES);
        occupancy.accumulate(&valid_target(1, 2000, 2000), &DEFAULT_ZONES);
        occupancy.accumulate(&valid_target(2, -1000, 1000), &DEFAULT_ZONES);

        assert_eq!(occupancy.commit().flags(), [true, true, false]);
    }

    #[test]
    fn test_no_memory_across_cycles() {
        let mut occupancy = OccupancyStateMachine::new();
        occupancy.begin_cycle();
        occupancy.accumulate(&valid_target(0, 0, 5000), &DEFAULT_ZONES);
        assert!(occupancy.commit().is_occupied(ZoneIndex::Third));

        occupancy.begin_cycle();
        occupancy.accumulate(&RadarTarget::empty(0), &DEFAULT_ZONES);
        let state = occupancy.commit();

        assert!(!state.any());
        assert_eq!(occupancy.committed(), state);
    }

    #[test]
    fn test_committed_unchanged_until_commit() {
        let mut occupancy = OccupancyStateMachine::new();
        occupancy.begin_cycle();
        occupancy.accumulate(&valid_target(0, -2000, 2000), &DEFAULT_ZONES);

        assert!(!occupancy.committed().any());
        occupancy.commit();
        assert!(occupancy.committed().is_occupied(ZoneIndex::First));
    }
}
