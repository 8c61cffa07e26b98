//! Sensor stall detection and link recovery
//!
//! Counts consecutive `NoData` reads. A frame, even one with no valid target,
//! resets the count. Once the count reaches the threshold the cycle runs the
//! recovery sequence: tear the link down, settle, re-init with the same target
//! count, settle again. Recovery never gives up; a failed re-init simply leaves
//! the next read empty, which triggers another recovery.

use crate::domain::types::ReadOutcome;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::sensor::SensorLink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    Healthy,
    /// No data, threshold not reached yet
    Stalled { consecutive: u32 },
    RecoveryDue { consecutive: u32 },
}

pub struct ResilienceSupervisor {
    stall_threshold: u32,
    teardown_settle: Duration,
    reinit_settle: Duration,
    target_count: usize,
    consecutive_no_data: u32,
    metrics: Arc<Metrics>,
}

impl ResilienceSupervisor {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            stall_threshold: config.stall_threshold().max(1),
            teardown_settle: Duration::from_millis(config.teardown_settle_ms()),
            reinit_settle: Duration::from_millis(config.reinit_settle_ms()),
            target_count: config.target_count(),
            consecutive_no_data: 0,
            metrics,
        }
    }

    pub fn observe(&mut self, outcome: ReadOutcome) -> StallVerdict {
        match outcome {
            ReadOutcome::Frame(_) => {
                self.consecutive_no_data = 0;
                StallVerdict::Healthy
            }
            ReadOutcome::NoData => {
                self.consecutive_no_data = self.consecutive_no_data.saturating_add(1);
                let consecutive = self.consecutive_no_data;
                if consecutive >= self.stall_threshold {
                    StallVerdict::RecoveryDue { consecutive }
                } else {
                    StallVerdict::Stalled { consecutive }
                }
            }
        }
    }

    pub fn consecutive_no_data(&self) -> u32 {
        self.consecutive_no_data
    }

    /// Blocking re-init of the sensor link. Touches nothing but the link.
    pub async fn recover<L: SensorLink + ?Sized>(&mut self, link: &mut L) {
        warn!(consecutive = self.consecutive_no_data, "sensor_stall_detected");

        link.end().await;
        tokio::time::sleep(self.teardown_settle).await;

        link.set_number_of_targets(self.target_count);
        match link.begin().await {
            Ok(()) => info!(target_count = self.target_count, "sensor_reinitialized"),
            Err(e) => error!(error = %format!("{:#}", e), "sensor_reinit_failed"),
        }
        tokio::time::sleep(self.reinit_settle).await;

        self.consecutive_no_data = 0;
        self.metrics.record_recovery();
    }
}
