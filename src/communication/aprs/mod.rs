//! APRS PDU codec
//!
//! Encoders for everything the tracker originates (position+telemetry,
//! telemetry configuration, messages, acks, APRSD summaries, log blobs),
//! the decoder for incoming UI frames and the dispatcher that routes
//! them.

pub mod decode;
pub mod dispatcher;
pub mod message;
pub mod position;
pub mod telemetry;

pub use decode::{decode_info, AprsPdu, MessageEvent, MessageKind};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig, HeardTable, Reply};

use crate::communication::ax25::Ax25Error;

/// Codec-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AprsError {
    /// Encoded info field would exceed the AX.25 limit
    PacketTooLong,
    /// Message payload empty or over 67 characters
    BadMessageLength,
    /// Frame assembly failed
    Frame(Ax25Error),
}

impl From<Ax25Error> for AprsError {
    fn from(e: Ax25Error) -> Self {
        match e {
            Ax25Error::PacketTooLong => AprsError::PacketTooLong,
            other => AprsError::Frame(other),
        }
    }
}

/// Display symbol carried in position reports (primary table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AprsSymbol {
    Balloon = 0,
    Car = 1,
    WxStation = 2,
    SmallAircraft = 3,
}

impl AprsSymbol {
    pub fn table(&self) -> u8 {
        b'/'
    }

    pub fn code(&self) -> u8 {
        match self {
            AprsSymbol::Balloon => b'O',
            AprsSymbol::Car => b'>',
            AprsSymbol::WxStation => b'_',
            AprsSymbol::SmallAircraft => b'\'',
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => AprsSymbol::Balloon,
            1 => AprsSymbol::Car,
            2 => AprsSymbol::WxStation,
            3 => AprsSymbol::SmallAircraft,
            _ => return None,
        })
    }
}
