//! Shared types for the zone presence pipeline

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Number of monitored zones. Fixed for the lifetime of the process.
pub const ZONE_COUNT: usize = 3;

/// Number of target slots carried by one sensor frame
pub const MAX_TARGETS: usize = 3;

/// Compiled-in zone geometry used until the config or the API overrides it
pub const DEFAULT_ZONES: [Zone; ZONE_COUNT] = [
    Zone::new(1, 1, 4000, 4000),
    Zone::new(-4000, 1, -1, 4000),
    Zone::new(-4001, 4001, 4001, 6000),
];

/// One target slot of a sensor frame, in sensor-native coordinates.
///
/// Created fresh by the sensor link on every read and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadarTarget {
    /// Slot index within the frame (0-based)
    pub slot: usize,
    /// Horizontal position in mm, sensor axis
    pub x: i16,
    /// Depth in mm
    pub y: i16,
    /// Radial speed in cm/s
    pub speed: i16,
    /// Distance resolution in mm
    pub resolution: u16,
    /// Straight-line distance from the sensor in mm
    pub distance: u16,
    pub valid: bool,
}

impl RadarTarget {
    /// An unoccupied slot
    pub fn empty(slot: usize) -> Self {
        Self { slot, ..Self::default() }
    }

    /// Position in room coordinates.
    ///
    /// The sensor faces into the room, so its x axis is mirrored relative to
    /// the monitored space. Only the position is transformed; speed,
    /// resolution and distance stay in sensor terms.
    #[inline]
    pub fn semantic_position(&self) -> Point {
        Point { x: -i32::from(self.x), y: i32::from(self.y) }
    }

    /// 1-based id reported to subscribers. This is the slot, not a track identity.
    #[inline]
    pub fn id(&self) -> u32 {
        self.slot as u32 + 1
    }
}

impl fmt::Display for RadarTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.semantic_position();
        write!(
            f,
            "TARGET ID={} X={}mm, Y={}mm, SPEED={}cm/s, RESOLUTION={}mm, DISTANCE={}mm, VALID={}",
            self.id(),
            p.x,
            p.y,
            self.speed,
            self.resolution,
            self.distance,
            u8::from(self.valid)
        )
    }
}

/// A position in room coordinates (mm)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Index of one of the fixed zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneIndex {
    First,
    Second,
    Third,
}

impl ZoneIndex {
    pub const ALL: [ZoneIndex; ZONE_COUNT] = [ZoneIndex::First, ZoneIndex::Second, ZoneIndex::Third];

    #[inline]
    pub fn as_usize(self) -> usize {
        match self {
            ZoneIndex::First => 0,
            ZoneIndex::Second => 1,
            ZoneIndex::Third => 2,
        }
    }

    pub fn from_usize(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 1-based zone number used in logs
    pub fn number(self) -> usize {
        self.as_usize() + 1
    }
}

impl fmt::Display for ZoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZONE {}", self.number())
    }
}

/// Axis-aligned rectangle in room coordinates (mm).
///
/// The corners are stored as written; x1 > x2 or y1 > y2 is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Zone {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Inclusive x range regardless of corner order
    #[inline]
    pub fn x_bounds(&self) -> (i32, i32) {
        (self.x1.min(self.x2), self.x1.max(self.x2))
    }

    /// Inclusive y range regardless of corner order
    #[inline]
    pub fn y_bounds(&self) -> (i32, i32) {
        (self.y1.min(self.y2), self.y1.max(self.y2))
    }
}

/// Partial geometry update for one zone.
///
/// Each field is either present or absent; `null` counts as absent. Unknown
/// keys are ignored so dashboard payloads carrying `id`/`color` still parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ZonePatch {
    #[serde(default)]
    pub x1: Option<i32>,
    #[serde(default)]
    pub y1: Option<i32>,
    #[serde(default)]
    pub x2: Option<i32>,
    #[serde(default)]
    pub y2: Option<i32>,
}

impl ZonePatch {
    /// Merge into `zone`: present fields replace, absent fields keep the current value
    pub fn apply_to(&self, zone: Zone) -> Zone {
        Zone {
            x1: self.x1.unwrap_or(zone.x1),
            y1: self.y1.unwrap_or(zone.y1),
            x2: self.x2.unwrap_or(zone.x2),
            y2: self.y2.unwrap_or(zone.y2),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x1.is_none() && self.y1.is_none() && self.x2.is_none() && self.y2.is_none()
    }
}

/// Zones containing a point, in zone order
pub type ZoneMatches = SmallVec<[ZoneIndex; ZONE_COUNT]>;

/// Per-zone occupancy flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OccupancyState([bool; ZONE_COUNT]);

impl OccupancyState {
    pub fn from_flags(flags: [bool; ZONE_COUNT]) -> Self {
        Self(flags)
    }

    #[inline]
    pub fn is_occupied(&self, zone: ZoneIndex) -> bool {
        self.0[zone.as_usize()]
    }

    #[inline]
    pub fn mark(&mut self, zone: ZoneIndex) {
        self.0[zone.as_usize()] = true;
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|&occupied| occupied)
    }

    pub fn flags(&self) -> [bool; ZONE_COUNT] {
        self.0
    }
}

impl fmt::Display for OccupancyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0.map(u8::from);
        write!(f, "[{} {} {}]", a, b, c)
    }
}

/// Result of one sensor read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing arrived from the sensor this cycle (stall)
    NoData,
    /// A frame arrived; carries the number of valid targets (may be 0)
    Frame(usize),
}

impl ReadOutcome {
    pub fn is_no_data(&self) -> bool {
        matches!(self, ReadOutcome::NoData)
    }
}

/// Position message broadcast to subscribers, one per slot per cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: u32,
    pub x: i32,
    pub y: i32,
}

impl TelemetryRecord {
    /// Invalid slots report the origin so subscribers still get one message per slot
    pub fn from_target(target: &RadarTarget) -> Self {
        if target.valid {
            let p = target.semantic_position();
            Self { id: target.id(), x: p.x, y: p.y }
        } else {
            Self { id: target.id(), x: 0, y: 0 }
        }
    }
}
