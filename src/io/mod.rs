//! IO modules - external system interfaces
//!
//! - `sensor` - sensor link trait consumed by the cycle loop
//! - `ld2450` - LD2450 radar over a serial port
//! - `indicator` - presence indicator output (GPIO or log)
//! - `network` - connectivity supervision
//! - `telemetry` - per-subscriber telemetry fan-out
//! - `http` - zone API and WebSocket endpoint

pub mod http;
pub mod indicator;
pub mod ld2450;
pub mod network;
pub mod sensor;
pub mod telemetry;

pub use http::{start_http_server, HttpState};
pub use indicator::{GpioValueIndicator, Indicator, LogIndicator};
pub use ld2450::Ld2450Link;
pub use network::{ConnectivityGateway, ConnectivityStatus, LinkState, NetworkProbe};
pub use sensor::SensorLink;
pub use telemetry::TelemetryPublisher;
