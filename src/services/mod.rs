//! Services - the presence pipeline and its shared state
//!
//! - `cycle` - the sensing loop tying the pipeline together
//! - `classifier` - inclusive zone containment
//! - `occupancy` - per-cycle occupancy latching
//! - `resilience` - sensor stall detection and link recovery
//! - `zone_store` - zone geometry shared with the HTTP side
//! - `zone_config` - runtime geometry reads and partial updates

pub mod classifier;
pub mod cycle;
pub mod occupancy;
pub mod resilience;
pub mod zone_config;
pub mod zone_store;

pub use cycle::{CycleReport, CycleRunner};
pub use occupancy::OccupancyStateMachine;
pub use resilience::{ResilienceSupervisor, StallVerdict};
pub use zone_config::{ZoneConfigService, ZoneUpdateError};
pub use zone_store::ZoneStore;
