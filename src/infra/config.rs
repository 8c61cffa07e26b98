//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` or the CONFIG_FILE
//! environment variable (default: config/dev.toml).
//!
//! Every section is optional; missing keys take the defaults below.

use crate::domain::types::{Zone, DEFAULT_ZONES, MAX_TARGETS, ZONE_COUNT};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_device")]
    pub device: String,
    #[serde(default = "default_sensor_baud")]
    pub baud: u32,
    /// Number of target slots the sensor should report (1..=3)
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    /// How long one read waits for a complete frame before reporting no data
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: default_sensor_device(),
            baud: default_sensor_baud(),
            target_count: default_target_count(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_sensor_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_sensor_baud() -> u32 {
    256_000
}

fn default_target_count() -> usize {
    MAX_TARGETS
}

fn default_read_timeout_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive no-data cycles before the sensor link is reinitialised
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
    /// Pause after tearing the link down
    #[serde(default = "default_teardown_settle_ms")]
    pub teardown_settle_ms: u64,
    /// Pause after reopening the link
    #[serde(default = "default_reinit_settle_ms")]
    pub reinit_settle_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
            teardown_settle_ms: default_teardown_settle_ms(),
            reinit_settle_ms: default_reinit_settle_ms(),
        }
    }
}

fn default_stall_threshold() -> u32 {
    1
}

fn default_teardown_settle_ms() -> u64 {
    1000
}

fn default_reinit_settle_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Interface whose link state is supervised (e.g. "wlan0"); none = always connected
    #[serde(default)]
    pub interface: Option<String>,
    /// Retry poll while disconnected
    #[serde(default = "default_network_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Probe interval while connected
    #[serde(default = "default_network_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Hold the cycle loop until the network is back
    #[serde(default)]
    pub block_cycle_until_connected: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            poll_interval_ms: default_network_poll_interval_ms(),
            check_interval_ms: default_network_check_interval_ms(),
            block_cycle_until_connected: false,
        }
    }
}

fn default_network_poll_interval_ms() -> u64 {
    500
}

fn default_network_check_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Queued telemetry messages per subscriber before drops start
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind_address(),
            port: default_http_port(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_subscriber_buffer() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct IndicatorConfig {
    /// sysfs GPIO value file (e.g. /sys/class/gpio/gpio2/value); none = log only
    #[serde(default)]
    pub gpio_value_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Startup zone geometry; must list exactly three zones when present
    #[serde(default)]
    pub zones: Option<Vec<Zone>>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    sensor_device: String,
    sensor_baud: u32,
    target_count: usize,
    read_timeout_ms: u64,
    stall_threshold: u32,
    teardown_settle_ms: u64,
    reinit_settle_ms: u64,
    network_interface: Option<String>,
    network_poll_interval_ms: u64,
    network_check_interval_ms: u64,
    block_cycle_until_connected: bool,
    http_bind_address: String,
    http_port: u16,
    subscriber_buffer: usize,
    indicator_gpio_path: Option<String>,
    metrics_interval_secs: u64,
    initial_zones: [Zone; ZONE_COUNT],
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { sensor, resilience, network, http, indicator, metrics, zones } =
            toml_config;

        Self {
            sensor_device: sensor.device,
            sensor_baud: sensor.baud,
            target_count: sensor.target_count.clamp(1, MAX_TARGETS),
            read_timeout_ms: sensor.read_timeout_ms.max(1),
            stall_threshold: resilience.stall_threshold.max(1),
            teardown_settle_ms: resilience.teardown_settle_ms,
            reinit_settle_ms: resilience.reinit_settle_ms,
            network_interface: network.interface.filter(|name| !name.is_empty()),
            network_poll_interval_ms: network.poll_interval_ms.max(1),
            network_check_interval_ms: network.check_interval_ms.max(1),
            block_cycle_until_connected: network.block_cycle_until_connected,
            http_bind_address: http.bind_address,
            http_port: http.port,
            subscriber_buffer: http.subscriber_buffer.max(1),
            indicator_gpio_path: indicator.gpio_value_path.filter(|path| !path.is_empty()),
            metrics_interval_secs: metrics.interval_secs.max(1),
            initial_zones: zones
                .and_then(|list| <[Zone; ZONE_COUNT]>::try_from(list).ok())
                .unwrap_or(DEFAULT_ZONES),
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(zones) = &toml_config.zones {
            if zones.len() != ZONE_COUNT {
                bail!(
                    "Config file {} lists {} zones, expected exactly {}",
                    path.display(),
                    zones.len(),
                    ZONE_COUNT
                );
            }
        }

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn sensor_device(&self) -> &str {
        &self.sensor_device
    }

    pub fn sensor_baud(&self) -> u32 {
        self.sensor_baud
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn read_timeout_ms(&self) -> u64 {
        self.read_timeout_ms
    }

    pub fn stall_threshold(&self) -> u32 {
        self.stall_threshold
    }

    pub fn teardown_settle_ms(&self) -> u64 {
        self.teardown_settle_ms
    }

    pub fn reinit_settle_ms(&self) -> u64 {
        self.reinit_settle_ms
    }

    pub fn network_interface(&self) -> Option<&str> {
        self.network_interface.as_deref()
    }

    pub fn network_poll_interval_ms(&self) -> u64 {
        self.network_poll_interval_ms
    }

    pub fn network_check_interval_ms(&self) -> u64 {
        self.network_check_interval_ms
    }

    pub fn block_cycle_until_connected(&self) -> bool {
        self.block_cycle_until_connected
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    pub fn indicator_gpio_path(&self) -> Option<&str> {
        self.indicator_gpio_path.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn initial_zones(&self) -> [Zone; ZONE_COUNT] {
        self.initial_zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the recovery settle delays
    pub fn with_settle_delays(mut self, teardown_ms: u64, reinit_ms: u64) -> Self {
        self.teardown_settle_ms = teardown_ms;
        self.reinit_settle_ms = reinit_ms;
        self
    }

    /// Builder method for tests to change the stall threshold
    pub fn with_stall_threshold(mut self, threshold: u32) -> Self {
        self.stall_threshold = threshold.max(1);
        self
    }
}
