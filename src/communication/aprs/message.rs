//! APRS messages and derived PDUs
//!
//! Text messages with optional `{NNN}` ack numbers, the ack/rej replies,
//! the APRSD heard-direct summary and the base91 log blob packets the log
//! thread transmits.

use crate::communication::aprs::AprsError;
use crate::communication::ax25::{Callsign, MAX_INFO};
use crate::communication::base91;
use crate::core::datapoint::{TelemetryPoint, POINT_WIRE_LEN};
use core::fmt::Write;
use heapless::{String, Vec};

/// APRS message payload limit.
pub const MAX_MESSAGE_LEN: usize = 67;

/// Log records carried per packet (`{{L` prefix plus base91 text).
pub const LOG_RECORDS_PER_PACKET: usize = 2;

fn addressed(dest: &Callsign) -> String<MAX_INFO> {
    let mut s = String::new();
    let _ = write!(s, ":{:<9}:", dest.format());
    s
}

/// Encode a text message, optionally requesting an ack with `{NNN}`.
pub fn encode_message(
    dest: &Callsign,
    text: &str,
    number: Option<u16>,
) -> Result<Vec<u8, MAX_INFO>, AprsError> {
    if text.is_empty() || text.len() > MAX_MESSAGE_LEN {
        return Err(AprsError::BadMessageLength);
    }
    let mut s = addressed(dest);
    s.push_str(text).map_err(|_| AprsError::PacketTooLong)?;
    if let Some(n) = number {
        write!(s, "{{{:03}", n % 1000).map_err(|_| AprsError::PacketTooLong)?;
    }
    Vec::from_slice(s.as_bytes()).map_err(|_| AprsError::PacketTooLong)
}

/// Ack an incoming message, echoing its number verbatim.
pub fn encode_ack(dest: &Callsign, number: &str) -> Vec<u8, MAX_INFO> {
    let mut s = addressed(dest);
    let _ = s.push_str("ack");
    let _ = s.push_str(number);
    Vec::from_slice(s.as_bytes()).unwrap_or_default()
}

/// Reject an incoming message, echoing its number verbatim.
pub fn encode_rej(dest: &Callsign, number: &str) -> Vec<u8, MAX_INFO> {
    let mut s = addressed(dest);
    let _ = s.push_str("rej");
    let _ = s.push_str(number);
    Vec::from_slice(s.as_bytes()).unwrap_or_default()
}

/// APRSD response: stations heard directly since the window opened.
pub fn encode_aprsd<'a>(
    dest: &Callsign,
    heard: impl Iterator<Item = &'a Callsign>,
) -> Vec<u8, MAX_INFO> {
    let mut s = addressed(dest);
    let _ = s.push_str("Directs=");
    let mut first = true;
    for call in heard {
        if !first && s.push(' ').is_err() {
            break;
        }
        if s.push_str(&call.format()).is_err() {
            break;
        }
        first = false;
    }
    Vec::from_slice(s.as_bytes()).unwrap_or_default()
}

/// Pack up to [`LOG_RECORDS_PER_PACKET`] telemetry points into one log
/// packet: `{{L` prefix, then each record as base91 text.
pub fn encode_log_packet(records: &[TelemetryPoint]) -> Result<Vec<u8, MAX_INFO>, AprsError> {
    let mut out: Vec<u8, MAX_INFO> = Vec::new();
    out.extend_from_slice(b"{{L")
        .map_err(|_| AprsError::PacketTooLong)?;
    for record in records.iter().take(LOG_RECORDS_PER_PACKET) {
        let blob: Vec<u8, { POINT_WIRE_LEN / 2 * 3 }> = base91::encode_blob(&record.to_bytes());
        out.extend_from_slice(&blob)
            .map_err(|_| AprsError::PacketTooLong)?;
    }
    Ok(out)
}

/// Decode a log packet back into telemetry points (CLI and tests).
pub fn decode_log_packet(info: &[u8]) -> Option<Vec<TelemetryPoint, LOG_RECORDS_PER_PACKET>> {
    let text = info.strip_prefix(b"{{L")?;
    const RECORD_CHARS: usize = POINT_WIRE_LEN / 2 * 3;
    if text.len() % RECORD_CHARS != 0 {
        return None;
    }
    let mut out = Vec::new();
    for chunk in text.chunks_exact(RECORD_CHARS) {
        let bytes: heapless::Vec<u8, POINT_WIRE_LEN> =
            base91::decode_blob(chunk, POINT_WIRE_LEN)?;
        let mut wire = [0u8; POINT_WIRE_LEN];
        wire.copy_from_slice(&bytes);
        out.push(TelemetryPoint::from_bytes(&wire)?).ok()?;
    }
    Some(out)
}
