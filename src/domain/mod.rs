//! Domain models - per-cycle targets, zone geometry and occupancy
//!
//! - `RadarTarget` - one target slot of a sensor frame
//! - `Zone` / `ZonePatch` - zone rectangle and its partial update
//! - `OccupancyState` - per-zone occupancy flags
//! - `TelemetryRecord` - position message sent to subscribers

pub mod types;

pub use types::{
    OccupancyState, Point, RadarTarget, ReadOutcome, TelemetryRecord, Zone, ZoneIndex,
    ZoneMatches, ZonePatch, DEFAULT_ZONES, MAX_TARGETS, ZONE_COUNT,
};
