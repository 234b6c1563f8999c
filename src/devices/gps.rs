//! GPS receiver facade
//!
//! The collector drives the receiver through this trait: power it up,
//! poll until a fix arrives or the acquisition window closes, power it
//! down. UBX parsing and the serial link live in the board support crate.

use crate::platform::Result;

/// One position solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsFix {
    /// Epoch seconds from the GPS week/tow
    pub time: u32,
    /// Latitude in 1e-7 degree
    pub lat: i32,
    /// Longitude in 1e-7 degree
    pub lon: i32,
    /// Altitude in meters
    pub alt: u16,
    /// Satellites used
    pub sats: u8,
    /// Position DOP in 0.05 per unit
    pub pdop: u8,
}

/// GPS receiver interface.
pub trait Gps {
    /// Switch the receiver supply on.
    fn power_on(&mut self) -> Result<()>;

    /// Switch the receiver supply off.
    fn power_off(&mut self);

    /// Poll for a solution. `Ok(None)` means still searching.
    fn poll_fix(&mut self) -> Result<Option<GpsFix>>;
}

/// Scripted GPS for host tests: produces a fix after a number of polls.
pub struct MockGps {
    pub fix: GpsFix,
    pub polls_until_fix: u32,
    pub comm_error: bool,
    pub powered: bool,
    polls: u32,
}

impl MockGps {
    pub fn locks_after(polls: u32, fix: GpsFix) -> Self {
        Self {
            fix,
            polls_until_fix: polls,
            comm_error: false,
            powered: false,
            polls: 0,
        }
    }

    pub fn never_locks() -> Self {
        Self::locks_after(u32::MAX, GpsFix {
            time: 0,
            lat: 0,
            lon: 0,
            alt: 0,
            sats: 0,
            pdop: 0,
        })
    }
}

impl Gps for MockGps {
    fn power_on(&mut self) -> Result<()> {
        self.powered = true;
        self.polls = 0;
        Ok(())
    }

    fn power_off(&mut self) {
        self.powered = false;
    }

    fn poll_fix(&mut self) -> Result<Option<GpsFix>> {
        use crate::platform::{I2cError, PlatformError};
        if self.comm_error {
            return Err(PlatformError::I2c(I2cError::Timeout));
        }
        self.polls += 1;
        if self.polls >= self.polls_until_fix {
            Ok(Some(self.fix))
        } else {
            Ok(None)
        }
    }
}
