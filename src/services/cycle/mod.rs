//! Sensing cycle - the single loop driving the pipeline
//!
//! Per cycle:
//! 1. check connectivity (waits only when configured to block)
//! 2. read one frame from the sensor link
//! 3. feed the outcome to the stall supervisor
//! 4. on a frame, classify every slot, publish its telemetry and latch occupancy
//! 5. commit occupancy and drive the indicator
//! 6. run the blocking link recovery if the supervisor asks for it
//!
//! The loop owns occupancy and the working buffer. The only state it shares
//! with the HTTP side is the `ZoneStore`, read once per target.

use crate::domain::types::{OccupancyState, ReadOutcome, TelemetryRecord};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::indicator::Indicator;
use crate::io::network::{ConnectivityStatus, LinkState};
use crate::io::sensor::SensorLink;
use crate::io::telemetry::TelemetryPublisher;
use crate::services::occupancy::OccupancyStateMachine;
use crate::services::resilience::{ResilienceSupervisor, StallVerdict};
use crate::services::zone_store::ZoneStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};


/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: ReadOutcome,
    pub occupancy: OccupancyState,
    pub indicator_on: bool,
    /// Telemetry records published (one per slot on a frame, none on no data)
    pub records_published: usize,
    pub recovered: bool,
}

pub struct CycleRunner<L: SensorLink, I: Indicator> {
    link: L,
    indicator: I,
    zones: ZoneStore,
    occupancy: OccupancyStateMachine,
    resilience: ResilienceSupervisor,
    telemetry: Arc<TelemetryPublisher>,
    connectivity: Option<ConnectivityStatus>,
    last_link_state: Option<LinkState>,
    metrics: Arc<Metrics>,
}

impl<L: SensorLink, I: Indicator> CycleRunner<L, I> {
    pub fn new(
        link: L,
        indicator: I,
        zones: ZoneStore,
        telemetry: Arc<TelemetryPublisher>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            link,
            indicator,
            zones,
            occupancy: OccupancyStateMachine::new(),
            resilience: ResilienceSupervisor::new(config, metrics.clone()),
            telemetry,
            connectivity: None,
            last_link_state: None,
            metrics,
        }
    }

    pub fn with_connectivity(mut self, status: ConnectivityStatus) -> Self {
        self.connectivity = Some(status);
        self
    }

    pub fn occupancy(&self) -> OccupancyState {
        self.occupancy.committed()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Run cycles until shutdown, then close the link and clear the indicator
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("cycle_loop_started");

        loop {
            tokio::select! {
                report = self.run_cycle() => {
                    trace!(
                        outcome = ?report.outcome,
                        occupancy = %report.occupancy,
                        recovered = report.recovered,
                        "cycle_completed"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.link.end().await;
        self.drive_indicator(false);
        info!(cycles = self.metrics.cycles_total(), "cycle_loop_stopped");
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.ensure_connected().await;

        let outcome = self.link.read().await;
        let started = Instant::now();
        let verdict = self.resilience.observe(outcome);

        self.occupancy.begin_cycle();
        let mut any_valid = false;
        let mut records_published = 0;

        match outcome {
            ReadOutcome::Frame(valid_targets) => {
                self.metrics.record_frame(valid_targets);
                for slot in 0..self.link.supported_target_count() {
                    let target = self.link.target(slot);
                    if target.valid {
                        debug!("{}", target);
                    }

                    let zones = self.zones.snapshot();
                    self.occupancy.accumulate(&target, &zones);
                    self.telemetry.publish(&TelemetryRecord::from_target(&target));
                    records_published += 1;
                    any_valid |= target.valid;
                }
            }
            ReadOutcome::NoData => {
                self.metrics.record_no_data();
                debug!(consecutive = self.resilience.consecutive_no_data(), "sensor_no_data");
            }
        }

        let occupancy = self.occupancy.commit();
        self.drive_indicator(any_valid);
        self.metrics.record_cycle(started.elapsed().as_micros() as u64);

        let recovered = matches!(verdict, StallVerdict::RecoveryDue { .. });
        if recovered {
            self.resilience.recover(&mut self.link).await;
        }

        CycleReport { outcome, occupancy, indicator_on: any_valid, records_published, recovered }
    }

    async fn ensure_connected(&mut self) {
        let Some(status) = self.connectivity.as_mut() else {
            return;
        };

        let state = status.ensure_connected().await;
        if self.last_link_state == Some(state) {
            return;
        }
        match state {
            LinkState::Connected => info!("cycle_network_available"),
            LinkState::Retrying => warn!("cycle_running_without_network"),
            LinkState::Idle => debug!("cycle_network_unknown"),
        }
        self.last_link_state = Some(state);
    }

    fn drive_indicator(&mut self, on: bool) {
        if let Err(e) = self.indicator.set(on) {
            warn!(error = %format!("{:#}", e), "indicator_write_failed");
        }
    }
}
