//! Sensor link abstraction consumed by the cycle loop

use crate::domain::types::{RadarTarget, ReadOutcome};
use async_trait::async_trait;

/// A presence radar attached over some link (serial in production, scripted in tests).
///
/// After `read` returns `ReadOutcome::Frame`, `target(slot)` yields that
/// frame's records for every slot in `0..supported_target_count()`.
#[async_trait]
pub trait SensorLink: Send {
    /// Open the link. On failure the link stays closed and reads report `NoData`.
    async fn begin(&mut self) -> anyhow::Result<()>;

    /// Close the link and drop any buffered input
    async fn end(&mut self);

    /// Limit the number of reported target slots
    fn set_number_of_targets(&mut self, count: usize);

    /// Wait for the next frame
    async fn read(&mut self) -> ReadOutcome;

    /// Record for `slot` from the last frame; an empty record if out of range
    fn target(&self, slot: usize) -> RadarTarget;

    fn supported_target_count(&self) -> usize;
}
