//! Application threads
//!
//! The beacon, image, log and receiver loops, plus the debug shell. Each
//! thread follows the same cycle: wait for its trigger, request a
//! snapshot from the collector, check its sleep gate, compose packets and
//! hand them to the radio manager.
//!
//! Threads are plain generic async functions; the board bring-up layer
//! spawns them on its executor with the concrete device types.

pub mod beacon;
pub mod cli;
pub mod image;
pub mod logtx;
pub mod receiver;

use crate::communication::aprs::dispatcher::APRS_TOCALL;
use crate::communication::ax25::{Ax25Error, Ax25Frame, Callsign};
use crate::parameters::RadioConf;
use crate::subsystems::radio::{RadioError, RadioManager, RadioTask, TxPriority};

/// Seconds since boot.
pub(crate) fn now_secs() -> u32 {
    embassy_time::Instant::now().as_secs() as u32
}

/// Build an originated frame: our call, the standard tocall, the
/// configured digi path.
pub fn originate(src: Callsign, path: &str) -> Result<Ax25Frame, Ax25Error> {
    let dest = Callsign::parse(APRS_TOCALL)?;
    Ax25Frame::new(src, dest, path)
}

/// Allocate a pool buffer for `frame` and run it through the radio
/// manager. Pool exhaustion is reported as [`RadioError::PoolEmpty`];
/// the caller logs and drops.
pub async fn transmit_frame(
    radio: &RadioManager,
    rc: &RadioConf,
    frame: Ax25Frame,
    priority: TxPriority,
) -> Result<(), RadioError> {
    let Some(packet) = radio.pool().alloc() else {
        return Err(RadioError::PoolEmpty);
    };
    radio.pool().with(packet, |slot| *slot = frame);
    radio
        .transmit(RadioTask {
            packet,
            frequency: rc.freq,
            power: rc.pwr,
            modulation: rc.modulation,
            cca_rssi: rc.cca_rssi,
            preamble: rc.preamble,
            priority,
        })
        .await
}
