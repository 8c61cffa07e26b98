//! Zone containment

use crate::domain::types::{Point, Zone, ZoneIndex, ZoneMatches, ZONE_COUNT};

/// Inclusive on every edge; corner order does not matter
#[inline]
pub fn contains(zone: &Zone, point: Point) -> bool {
    let (min_x, max_x) = zone.x_bounds();
    let (min_y, max_y) = zone.y_bounds();
    (min_x..=max_x).contains(&point.x) && (min_y..=max_y).contains(&point.y)
}

/// Every zone containing `point`, in zone order. Overlapping zones all match.
pub fn classify(point: Point, zones: &[Zone; ZONE_COUNT]) -> ZoneMatches {
    ZoneIndex::ALL
        .into_iter()
        .filter(|index| contains(&zones[index.as_usize()], point))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RadarTarget, DEFAULT_ZONES};

    fn point(x: i32, y: i32) -> Point {
        Point { x, y }
    }

    #[test]
    fn test_edges_are_inclusive() {
        let zone = Zone::new(1, 1, 4000, 4000);
        assert!(contains(&zone, point(1, 1)));
        assert!(contains(&zone, point(4000, 4000)));
        assert!(contains(&zone, point(1, 4000)));
        assert!(!contains(&zone, point(0, 2000)));
        assert!(!contains(&zone, point(2000, 4001)));
    }

    #[test]
    fn test_reversed_corners() {
        let zone = Zone::new(4000, 4000, 1, 1);
        assert!(contains(&zone, point(2000, 2000)));
        assert!(contains(&zone, point(1, 4000)));
        assert!(!contains(&zone, point(-1, 2000)));
    }

    #[test]
    fn test_default_geometry_mirrored_target() {
        let target = RadarTarget { x: -2000, y: 2000, valid: true, ..RadarTarget::empty(0) };

        let matches = classify(target.semantic_position(), &DEFAULT_ZONES);

        assert_eq!(matches.as_slice(), &[ZoneIndex::First]);
    }

    #[test]
    fn test_overlapping_zones_all_match() {
        let zones = [Zone::new(0, 0, 100, 100), Zone::new(50, 50, 150, 150), Zone::new(200, 200, 300, 300)];

        let matches = classify(point(75, 75), &zones);

        assert_eq!(matches.as_slice(), &[ZoneIndex::First, ZoneIndex::Second]);
    }

    #[test]
    fn test_point_outside_every_zone() {
        assert!(classify(point(0, 0), &DEFAULT_ZONES).is_empty());
        assert!(classify(point(0, 7000), &DEFAULT_ZONES).is_empty());
    }

    #[test]
    fn test_gap_between_default_zones() {
        // x = 0 sits between zone 1 (x <= -1) and zone 0 (x >= 1)
        assert!(classify(point(0, 2000), &DEFAULT_ZONES).is_empty());
        assert_eq!(classify(point(0, 5000), &DEFAULT_ZONES).as_slice(), &[ZoneIndex::Third]);
    }
}
