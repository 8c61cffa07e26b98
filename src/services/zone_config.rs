//! Runtime zone reconfiguration
//!
//! Parses a JSON array of partial zones and applies it to the `ZoneStore`.
//! Nothing is written unless the whole payload is accepted.

use crate::domain::types::{Zone, ZonePatch, ZONE_COUNT};
use crate::infra::metrics::Metrics;
use crate::services::zone_store::ZoneStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ZoneUpdateError {
    #[error("Invalid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Too many zones")]
    TooManyZones(usize),
}

#[derive(Clone)]
pub struct ZoneConfigService {
    store: ZoneStore,
    metrics: Arc<Metrics>,
}

impl ZoneConfigService {
    pub fn new(store: ZoneStore, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    pub fn get_zones(&self) -> [Zone; ZONE_COUNT] {
        self.store.snapshot()
    }

    pub fn update_zones(&self, body: &[u8]) -> Result<[Zone; ZONE_COUNT], ZoneUpdateError> {
        let result = parse_patches(body).map(|patches| self.store.apply(&patches));

        match &result {
            Ok(zones) => info!(zones = ?zones, "zones_updated"),
            Err(e) => warn!(error = %e, detail = ?e, "zones_update_rejected"),
        }
        self.metrics.record_zone_update(result.is_ok());
        result
    }
}

fn parse_patches(body: &[u8]) -> Result<Vec<ZonePatch>, ZoneUpdateError> {
    let patches: Vec<ZonePatch> =
        serde_json::from_slice(body).map_err(ZoneUpdateError::InvalidJson)?;
    if patches.len() > ZONE_COUNT {
        return Err(ZoneUpdateError::TooManyZones(patches.len()));
    }
    Ok(patches)
}
