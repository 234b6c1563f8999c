//! Device facade traits
//!
//! Contracts for every external device class the core drives: GPS
//! receiver, I2C sensor set, camera and the radio transceiver. Board
//! support implements these; host tests use the bundled mocks.

pub mod camera;
pub mod gps;
pub mod sensors;
pub mod transceiver;

pub use camera::{Camera, Resolution};
pub use gps::{Gps, GpsFix};
pub use sensors::{AdcReadings, ChipTemps, EnvReading, EnvResult, PacReadings, SensorHub};
pub use transceiver::{Modulation, RxFrame, Transceiver};
