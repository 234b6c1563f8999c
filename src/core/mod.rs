//! Core systems
//!
//! The data collector and its snapshot type, the flash log ring, the
//! software watchdog and the logging macros.

pub mod collector;
pub mod datapoint;
pub mod log_ring;
pub mod logging;
pub mod watchdog;

pub use collector::{AppIntent, CollectorChannels, CollectorCore, CollectorPolicy};
pub use datapoint::{GpsState, SensorStatus, SysError, TelemetryPoint};
pub use log_ring::{LogRing, SharedLogRing};
pub use watchdog::Watchdog;
