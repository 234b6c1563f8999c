#![cfg_attr(not(test), no_std)]

//! stratotrack - APRS/SSDV high-altitude balloon tracker core
//!
//! This library implements the tracker core: a single-writer telemetry
//! collector, a flash-backed log ring, the APRS/AX.25 codec, and the radio
//! manager that serialises every transmission on the single transceiver.
//! Device drivers, clock bring-up and the USB shell transport live outside
//! this crate behind the facade traits in [`devices`] and [`platform`].
//!
//! # Design Principles
//!
//! - **Pure logic, thin tasks**: protocol and policy code is synchronous and
//!   host-testable; Embassy async wrappers only wait and forward
//! - **Single radio owner**: all transmissions funnel through
//!   [`subsystems::radio::RadioManager`]
//! - **No allocation**: heapless containers and a fixed packet arena

// Platform abstraction layer (flash, time, error taxonomy)
pub mod platform;

// Device facade traits and host mocks (GPS, power meter, BME280, camera,
// transceiver)
pub mod devices;

// Core systems: logging macros, data collector, log ring, watchdog
pub mod core;

// Non-volatile configuration
pub mod parameters;

// AX.25/APRS codec, HDLC bit layer, packet pool, SSDV
pub mod communication;

// Radio manager, band plan, geofence
pub mod subsystems;

// Application threads (beacon, image, log, receiver) and debug shell
pub mod tracker;

// Note: Logging macros (log_info!, log_warn!, log_error!, log_debug!) are
// exported at crate root via #[macro_export] in core::logging
