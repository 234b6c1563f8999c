//! APRS telemetry scaling and configuration PDUs
//!
//! Five analog channels scaled into 0..=255 plus eight digital bits ride
//! in the base91 `|...|` extension of every position packet. The scaling
//! is advertised over the air through the PARM/UNIT/EQNS/BITS group,
//! addressed to our own callsign, once per `tel_enc_cycle`.
//!
//! Channel map (EQNS recover the physical value from the 0..=255 raw):
//!
//! | ch | source      | raw              | EQNS            |
//! |----|-------------|------------------|-----------------|
//! | 1  | `adc_vbat`  | mV / 20          | 0, 0.02, 0 (V)  |
//! | 2  | `adc_vsol`  | mV / 20          | 0, 0.02, 0 (V)  |
//! | 3  | `pac_pbat`  | mW / 64 + 128    | 0, 0.064, -8.192 (W) |
//! | 4  | `pac_psol`  | mW / 64 + 128    | 0, 0.064, -8.192 (W) |
//! | 5  | on-board pressure | Pa / 500   | 0, 500, 0 (Pa)  |

use crate::communication::ax25::{Callsign, MAX_INFO};
use crate::communication::base91;
use crate::core::datapoint::{BmeSlot, SensorStatus, TelemetryPoint};
use core::fmt::Write;
use heapless::{String, Vec};

/// Number of telemetry configuration PDUs in one group.
pub const NUM_CONFIG_PDUS: usize = 4;

/// The four configuration PDU kinds, in transmission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigPdu {
    Parm,
    Unit,
    Eqns,
    Bits,
}

impl ConfigPdu {
    pub const ALL: [ConfigPdu; NUM_CONFIG_PDUS] =
        [ConfigPdu::Parm, ConfigPdu::Unit, ConfigPdu::Eqns, ConfigPdu::Bits];
}

/// Scale the five analog channels out of a telemetry point.
pub fn scale_analog(p: &TelemetryPoint) -> [u8; 5] {
    let press_pa = p.sen_press[BmeSlot::I1 as usize] / 10;
    [
        (p.adc_vbat / 20).min(255) as u8,
        (p.adc_vsol / 20).min(255) as u8,
        ((p.pac_pbat as i32 / 64) + 128).clamp(0, 255) as u8,
        ((p.pac_psol as i32 / 64) + 128).clamp(0, 255) as u8,
        (press_pa / 500).min(255) as u8,
    ]
}

/// Pack the eight digital bits: sensor health, GPS lock and one GPIO line.
pub fn digital_bits(p: &TelemetryPoint) -> u8 {
    let bme_ok = |slot| p.sys_error.bme_status(slot) == SensorStatus::Ok;
    (bme_ok(BmeSlot::I1) as u8)
        | (bme_ok(BmeSlot::E1) as u8) << 1
        | (bme_ok(BmeSlot::E2) as u8) << 2
        | (p.has_lock() as u8) << 3
        | (!p.sys_error.pac_error() as u8) << 4
        | (!p.sys_error.cam_error() as u8) << 5
        | (!p.sys_error.i2c_error() as u8) << 6
        | (p.gpio & 0x01) << 7
}

/// Append the base91 `|...|` telemetry extension for this point.
pub fn push_extension(p: &TelemetryPoint, out: &mut Vec<u8, MAX_INFO>) -> Result<(), ()> {
    let mut push = |b: u8| out.push(b).map_err(|_| ());
    push(b'|')?;
    for b in base91::encode_u13((p.id % 8280) as u16) {
        push(b)?;
    }
    for value in scale_analog(p) {
        for b in base91::encode_u13(value as u16) {
            push(b)?;
        }
    }
    for b in base91::encode_u13(digital_bits(p) as u16) {
        push(b)?;
    }
    push(b'|')
}

/// Encode one telemetry configuration PDU addressed to `own`.
pub fn encode_config(own: &Callsign, kind: ConfigPdu) -> Vec<u8, MAX_INFO> {
    let mut s: String<MAX_INFO> = String::new();
    let body = match kind {
        ConfigPdu::Parm => "PARM.Vbat,Vsol,Pbat,Psol,Press,BMEi1,BMEe1,BMEe2,GPS,PAC,CAM,I2C,IO0",
        ConfigPdu::Unit => "UNIT.V,V,W,W,Pa",
        ConfigPdu::Eqns => "EQNS.0,0.02,0,0,0.02,0,0,0.064,-8.192,0,0.064,-8.192,0,500,0",
        ConfigPdu::Bits => "BITS.11111111,STRATOTRACK",
    };
    let _ = write!(s, ":{:<9}:{}", own.format(), body);
    Vec::from_slice(s.as_bytes()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datapoint::SysError;

    fn point() -> TelemetryPoint {
        let mut p = TelemetryPoint::empty();
        p.id = 17;
        p.adc_vbat = 4100;
        p.adc_vsol = 1020;
        p.pac_pbat = -1024;
        p.pac_psol = 640;
        p.sen_press[0] = 1_012_500; // 0.1 Pa units
        p
    }

    #[test]
    fn analog_scaling_matches_eqns() {
        let a = scale_analog(&point());
        assert_eq!(a[0], 205); // 4100 mV -> 205 * 0.02 V = 4.10 V
        assert_eq!(a[1], 51); // 1020 mV
        assert_eq!(a[2], 112); // -1024 mW -> (112 * 0.064) - 8.192 = -1.024 W
        assert_eq!(a[3], 138); // 640 mW
        assert_eq!(a[4], 202); // 101250 Pa / 500
    }

    #[test]
    fn analog_channels_saturate() {
        let mut p = point();
        p.adc_vbat = 60_000;
        p.pac_pbat = i16::MIN;
        let a = scale_analog(&p);
        assert_eq!(a[0], 255);
        assert_eq!(a[2], 0);
    }

    #[test]
    fn digital_bits_reflect_health() {
        let mut p = point();
        // pristine sys_error: all BME slots OK, no errors, no lock
        assert_eq!(digital_bits(&p) & 0b0111_0111, 0b0111_0111);
        assert_eq!(digital_bits(&p) & 0b0000_1000, 0);
        p.gps_state = crate::core::datapoint::GpsState::LockedOn;
        assert_ne!(digital_bits(&p) & 0b0000_1000, 0);
        let mut e = SysError::NONE;
        e.set_pac_error();
        p.sys_error = e;
        assert_eq!(digital_bits(&p) & 0b0001_0000, 0);
    }

    #[test]
    fn config_pdus_are_addressed_to_own_call() {
        let own = Callsign::parse("DL7AD-12").unwrap();
        for kind in ConfigPdu::ALL {
            let info = encode_config(&own, kind);
            let text = core::str::from_utf8(&info).unwrap();
            assert!(text.starts_with(":DL7AD-12 :"), "{}", text);
        }
        let parm = encode_config(&own, ConfigPdu::Parm);
        assert!(core::str::from_utf8(&parm).unwrap().contains("PARM.Vbat"));
    }

    #[test]
    fn extension_is_well_formed() {
        let mut out: Vec<u8, MAX_INFO> = Vec::new();
        push_extension(&point(), &mut out).unwrap();
        // |seq + 5 analog + digital| = 2 + 1 + 12 + 2 + 1... pipes plus 7 values
        assert_eq!(out.len(), 2 + 7 * 2);
        assert_eq!(out[0], b'|');
        assert_eq!(*out.last().unwrap(), b'|');
        // seq round-trips
        assert_eq!(
            base91::decode_u13([out[1], out[2]]),
            Some(17)
        );
    }
}
