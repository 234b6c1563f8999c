//! Communication stack
//!
//! AX.25 framing, the HDLC bit layer, APRS PDU codec and dispatcher, the
//! shared packet pool and the SSDV image packetizer.

pub mod aprs;
pub mod ax25;
pub mod base91;
pub mod hdlc;
pub mod packet;
pub mod ssdv;

pub use ax25::{Ax25Error, Ax25Frame, Callsign};
pub use packet::{PacketHandle, PacketPool};
