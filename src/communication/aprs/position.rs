//! Position + telemetry report
//!
//! One info field carries the uncompressed position, the course/speed
//! extension, the altitude comment and the base91 telemetry extension.
//! All arithmetic is integer; coordinates arrive in 1e-7 degrees.

use crate::communication::aprs::telemetry::push_extension;
use crate::communication::aprs::{AprsError, AprsSymbol};
use crate::communication::ax25::MAX_INFO;
use crate::core::datapoint::TelemetryPoint;
use core::fmt::Write;
use heapless::{String, Vec};

/// Convert 1e-7 degree latitude into `DDMM.mmN` APRS text.
fn push_lat(s: &mut String<MAX_INFO>, lat: i32) {
    let hemi = if lat < 0 { 'S' } else { 'N' };
    let abs = lat.unsigned_abs();
    let deg = abs / 10_000_000;
    // minutes in 1/100 units: fractional degrees * 60 * 100
    let centi_min = (abs % 10_000_000) as u64 * 6 / 10_000;
    let _ = write!(
        s,
        "{:02}{:02}.{:02}{}",
        deg,
        centi_min / 100,
        centi_min % 100,
        hemi
    );
}

/// Convert 1e-7 degree longitude into `DDDMM.mmE` APRS text.
fn push_lon(s: &mut String<MAX_INFO>, lon: i32) {
    let hemi = if lon < 0 { 'W' } else { 'E' };
    let abs = lon.unsigned_abs();
    let deg = abs / 10_000_000;
    let centi_min = (abs % 10_000_000) as u64 * 6 / 10_000;
    let _ = write!(
        s,
        "{:03}{:02}.{:02}{}",
        deg,
        centi_min / 100,
        centi_min % 100,
        hemi
    );
}

/// Encode the position + telemetry info field.
pub fn encode_position_and_telemetry(
    point: &TelemetryPoint,
    symbol: AprsSymbol,
) -> Result<Vec<u8, MAX_INFO>, AprsError> {
    let mut s: String<MAX_INFO> = String::new();
    let _ = s.push('!');
    push_lat(&mut s, point.gps_lat);
    let _ = s.push(symbol.table() as char);
    push_lon(&mut s, point.gps_lon);
    let _ = s.push(symbol.code() as char);
    // course/speed unknown for a balloon; APRS wants zeros
    let _ = s.push_str("000/000");
    // altitude comment in feet
    let alt_ft = point.gps_alt as u32 * 10_000 / 3_048;
    let _ = write!(s, "/A={:06}", alt_ft);

    let mut out = Vec::from_slice(s.as_bytes()).map_err(|_| AprsError::PacketTooLong)?;
    push_extension(point, &mut out).map_err(|_| AprsError::PacketTooLong)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datapoint::GpsState;

    fn point() -> TelemetryPoint {
        let mut p = TelemetryPoint::empty();
        p.id = 1;
        p.gps_state = GpsState::LockedOff;
        p.gps_lat = 377_749_000; // 37.7749 N
        p.gps_lon = -1_224_194_000; // 122.4194 W
        p.gps_alt = 1000;
        p.adc_vbat = 4000;
        p
    }

    #[test]
    fn san_francisco_report() {
        let info = encode_position_and_telemetry(&point(), AprsSymbol::Balloon).unwrap();
        let text = core::str::from_utf8(&info).unwrap();
        // 37.7749 deg = 37 deg 46.49 min; 122.4194 = 122 deg 25.16 min
        assert!(text.starts_with("!3746.49N/12225.16WO000/000/A=003280"), "{}", text);
        assert!(text.contains('|'));
    }

    #[test]
    fn southern_eastern_hemispheres() {
        let mut p = point();
        p.gps_lat = -338_688_000; // Sydney
        p.gps_lon = 1_512_093_000;
        let info = encode_position_and_telemetry(&p, AprsSymbol::Balloon).unwrap();
        let text = core::str::from_utf8(&info).unwrap();
        assert!(text.starts_with("!3352.12S/15112.55EO"), "{}", text);
    }

    #[test]
    fn altitude_is_feet() {
        let mut p = point();
        p.gps_alt = 30_000; // high-altitude balloon, ~98 kft
        let info = encode_position_and_telemetry(&p, AprsSymbol::Balloon).unwrap();
        let text = core::str::from_utf8(&info).unwrap();
        assert!(text.contains("/A=098425"), "{}", text);
    }

    #[test]
    fn extension_terminates_the_field() {
        let info = encode_position_and_telemetry(&point(), AprsSymbol::Balloon).unwrap();
        assert_eq!(*info.last().unwrap(), b'|');
    }
}
