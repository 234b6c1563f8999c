//! Platform abstraction layer
//!
//! Error taxonomy plus the flash and time traits that the board support
//! package implements. `mock` provides host-test stand-ins.

pub mod error;
pub mod mock;
pub mod traits;

pub use error::{FlashError, I2cError, PlatformError, Result, SpiError};
pub use traits::{Clock, FlashInterface, SystemClock};
