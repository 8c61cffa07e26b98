//! Shared zone geometry
//!
//! One `RwLock` guards all three zones, so readers always see a complete
//! geometry and an update lands on every zone at once or not at all.

use crate::domain::types::{Zone, ZoneIndex, ZonePatch, ZONE_COUNT};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ZoneStore {
    zones: Arc<RwLock<[Zone; ZONE_COUNT]>>,
}

impl ZoneStore {
    pub fn new(initial: [Zone; ZONE_COUNT]) -> Self {
        Self { zones: Arc::new(RwLock::new(initial)) }
    }

    /// Copy of the whole geometry
    pub fn snapshot(&self) -> [Zone; ZONE_COUNT] {
        *self.zones.read()
    }

    pub fn zone(&self, index: ZoneIndex) -> Zone {
        self.zones.read()[index.as_usize()]
    }

    /// Merge `patches` into the zones in order (patch 0 to zone 0, ...) and
    /// return the resulting geometry. Zones without a patch are untouched.
    /// Patches past the last zone are ignored; callers reject those first.
    pub fn apply(&self, patches: &[ZonePatch]) -> [Zone; ZONE_COUNT] {
        let mut zones = self.zones.write();
        let mut next = *zones;
        for (zone, patch) in next.iter_mut().zip(patches) {
            *zone = patch.apply_to(*zone);
        }
        *zones = next;
        next
    }
}

impl Default for ZoneStore {
    fn default() -> Self {
        Self::new(crate::domain::types::DEFAULT_ZONES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DEFAULT_ZONES;

    #[test]
    fn test_patch_changes_only_present_fields() {
        let store = ZoneStore::default();
        let patch = ZonePatch { x2: Some(5000), ..Default::default() };

        let zones = store.apply(&[patch]);

        assert_eq!(zones[0], Zone::new(1, 1, 5000, 4000));
        assert_eq!(zones[1], DEFAULT_ZONES[1]);
        assert_eq!(zones[2], DEFAULT_ZONES[2]);
        assert_eq!(store.snapshot(), zones);
    }

    #[test]
    fn test_empty_patch_keeps_zone() {
        let store = ZoneStore::default();
        let second = ZonePatch { y1: Some(-10), ..Default::default() };

        store.apply(&[ZonePatch::default(), second]);

        assert_eq!(store.zone(ZoneIndex::First), DEFAULT_ZONES[0]);
        assert_eq!(store.zone(ZoneIndex::Second), Zone::new(-4000, -10, -1, 4000));
    }

    #[test]
    fn test_clones_share_geometry() {
        let store = ZoneStore::default();
        let reader = store.clone();
        let patch = ZonePatch { x1: Some(0), y1: Some(0), x2: Some(10), y2: Some(10) };

        store.apply(&[ZonePatch::default(), ZonePatch::default(), patch]);

        assert_eq!(reader.zone(ZoneIndex::Third), Zone::new(0, 0, 10, 10));
    }

    #[test]
    fn test_reversed_corners_are_stored_as_written() {
        let store = ZoneStore::default();
        let patch = ZonePatch { x1: Some(4000), x2: Some(1), ..Default::default() };

        store.apply(&[patch]);

        assert_eq!(store.zone(ZoneIndex::First), Zone::new(4000, 1, 1, 4000));
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_update() {
        let uniform = |k: i32| ZonePatch { x1: Some(k), y1: Some(k), x2: Some(k), y2: Some(k) };
        let store = ZoneStore::new([Zone::new(0, 0, 0, 0); ZONE_COUNT]);

        let writers: Vec<_> = (0..2)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for k in 1..=2_000 {
                        let k = k * 2 + w;
                        store.apply(&[uniform(k), uniform(k), uniform(k)]);
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        let zones = store.snapshot();
                        let k = zones[0].x1;
                        for zone in zones {
                            assert_eq!(zone, Zone::new(k, k, k, k));
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }
}
