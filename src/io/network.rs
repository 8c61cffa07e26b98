//! Network connectivity supervision
//!
//! `ConnectivityGateway` runs on its own task: it checks the link every
//! `check_interval`, and on loss retries every `poll_interval` until the link
//! is back. There is no retry limit and no backoff. The current `LinkState`
//! is published on a watch channel so the cycle loop never blocks on the
//! network unless configured to.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::infra::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Retrying,
    Connected,
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Ask the platform to (re)associate. Called once per outage.
    async fn request_connect(&self) -> anyhow::Result<()>;
}

/// Reads `<root>/<interface>/operstate`; `up` means connected.
/// Association itself is left to the OS network manager.
pub struct OperstateProbe {
    operstate_path: PathBuf,
}

impl OperstateProbe {
    pub fn new(interface: &str) -> Self {
        Self::with_sysfs_root("/sys/class/net", interface)
    }

    pub fn with_sysfs_root(root: impl Into<PathBuf>, interface: &str) -> Self {
        Self { operstate_path: root.into().join(interface).join("operstate") }
    }
}

#[async_trait]
impl NetworkProbe for OperstateProbe {
    async fn is_connected(&self) -> bool {
        match tokio::fs::read_to_string(&self.operstate_path).await {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!(path = %self.operstate_path.display(), error = %e, "operstate_read_failed");
                false
            }
        }
    }

    async fn request_connect(&self) -> anyhow::Result<()> {
        debug!(path = %self.operstate_path.display(), "network_reassociate_requested");
        Ok(())
    }
}

/// Used when no interface is configured
pub struct AlwaysConnected;

#[async_trait]
impl NetworkProbe for AlwaysConnected {
    async fn is_connected(&self) -> bool {
        true
    }

    async fn request_connect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ConnectivityGateway {
    probe: Arc<dyn NetworkProbe>,
    poll_interval: Duration,
    check_interval: Duration,
    state_tx: watch::Sender<LinkState>,
}

impl ConnectivityGateway {
    pub fn new(probe: Arc<dyn NetworkProbe>, poll_interval: Duration, check_interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Idle);
        Self { probe, poll_interval, check_interval, state_tx }
    }

    pub fn from_config(config: &Config) -> Self {
        let probe: Arc<dyn NetworkProbe> = match config.network_interface() {
            Some(interface) => Arc::new(OperstateProbe::new(interface)),
            None => Arc::new(AlwaysConnected),
        };
        Self::new(
            probe,
            Duration::from_millis(config.network_poll_interval_ms()),
            Duration::from_millis(config.network_check_interval_ms()),
        )
    }

    /// Handle for the cycle loop. With `blocking` set, `ensure_connected`
    /// waits for the link instead of returning the current state.
    pub fn status(&self, blocking: bool) -> ConnectivityStatus {
        ConnectivityStatus { rx: self.state_tx.subscribe(), blocking }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            check_interval_ms = self.check_interval.as_millis() as u64,
            "connectivity_gateway_started"
        );

        loop {
            tokio::select! {
                _ = self.supervise_once() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("connectivity_gateway_stopped");
    }

    async fn supervise_once(&self) {
        if self.probe.is_connected().await {
            self.set_state(LinkState::Connected);
            tokio::time::sleep(self.check_interval).await;
            return;
        }

        self.set_state(LinkState::Retrying);
        warn!("network_disconnected");
        if let Err(e) = self.probe.request_connect().await {
            warn!(error = %e, "network_connect_request_failed");
        }

        let mut attempts: u64 = 0;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            attempts += 1;
            if self.probe.is_connected().await {
                break;
            }
            debug!(attempts = attempts, "network_connecting");
        }

        info!(attempts = attempts, "network_connected");
        self.set_state(LinkState::Connected);
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

pub struct ConnectivityStatus {
    rx: watch::Receiver<LinkState>,
    blocking: bool,
}

impl ConnectivityStatus {
    pub fn current(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub async fn ensure_connected(&mut self) -> LinkState {
        if self.blocking {
            // Err means the gateway is gone; nothing left to wait for
            if let Ok(state) = self.rx.wait_for(|s| *s == LinkState::Connected).await {
                return *state;
            }
        }
        self.current()
    }
}
