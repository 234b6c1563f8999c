//! Telemetry data point
//!
//! `TelemetryPoint` is the authoritative snapshot the collector publishes
//! once per cycle. It is immutable after publication; every transmitter
//! thread reads the same instance. The packed little-endian wire layout
//! (`to_bytes`/`from_bytes`) is shared by the flash log ring and the log
//! transmitter and must stay bit-stable across firmware versions.

/// Packed size of one telemetry point on storage, excluding the CRC.
pub const POINT_WIRE_LEN: usize = 72;

/// Sentinel id marking an erased/empty log slot.
pub const POINT_ID_EMPTY: u32 = 0xFFFF_FFFF;

/// GPS acquisition outcome for one collector cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum GpsState {
    /// Locked, receiver switched off afterwards
    LockedOff = 0,
    /// Locked, receiver kept running
    LockedOn = 1,
    /// Powered the whole window without acquiring a fix
    Loss = 2,
    /// Never powered: battery below gps_off_vbat
    LowBattNeverOn = 3,
    /// Powered but switched off early: battery fell below gps_onper_vbat
    LowBattEarlyOff = 4,
    /// Position taken from the flash log after reset
    FromLog = 5,
    /// No prior acquisition
    Off = 6,
    /// Communication error with the receiver
    Error = 7,
    /// Fixed position received over APRS
    FromAprsFix = 8,
}

impl GpsState {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => GpsState::LockedOff,
            1 => GpsState::LockedOn,
            2 => GpsState::Loss,
            3 => GpsState::LowBattNeverOn,
            4 => GpsState::LowBattEarlyOff,
            5 => GpsState::FromLog,
            6 => GpsState::Off,
            7 => GpsState::Error,
            8 => GpsState::FromAprsFix,
            _ => return None,
        })
    }
}

/// Per-slot BME280 result status (2-bit field in `sys_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SensorStatus {
    Ok = 0,
    Fail = 1,
    NotFitted = 2,
}

impl SensorStatus {
    fn from_bits(v: u32) -> Self {
        match v & BME_STATUS_MASK {
            0 => SensorStatus::Ok,
            1 => SensorStatus::Fail,
            _ => SensorStatus::NotFitted,
        }
    }
}

/// BME280 slot index: one on-board sensor, up to two external.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BmeSlot {
    I1 = 0,
    E1 = 1,
    E2 = 2,
}

pub const BME_STATUS_BITS: u32 = 2;
pub const BME_STATUS_MASK: u32 = 0x3;

const I2C_ERROR_BIT: u32 = 0;
const GPS_ERROR_BIT: u32 = 2;
const PAC_STATUS_SHIFT: u32 = 3;
const CAM_STATUS_SHIFT: u32 = 5;
const CAM_STATUS_MASK: u32 = 0x7;
/// BME status fields occupy bits 8..14: i1 at 8, e1 at 10, e2 at 12.
const BME_ALL_STATUS_SHIFT: u32 = 8;

/// Packed system error word.
///
/// Bit usage:
/// - 0:1   I2C status
/// - 2     GPS status
/// - 3:4   PAC1720 status
/// - 5:7   OV5640 status
/// - 8:9   BME i1 status (0 = OK, 1 = Fail, 2 = Not fitted)
/// - 10:11 BME e1 status
/// - 12:13 BME e2 status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SysError(pub u32);

impl SysError {
    pub const NONE: SysError = SysError(0);

    pub fn set_i2c_error(&mut self) {
        self.0 |= 1 << I2C_ERROR_BIT;
    }

    pub fn i2c_error(&self) -> bool {
        self.0 & (1 << I2C_ERROR_BIT) != 0
    }

    pub fn set_gps_error(&mut self) {
        self.0 |= 1 << GPS_ERROR_BIT;
    }

    pub fn gps_error(&self) -> bool {
        self.0 & (1 << GPS_ERROR_BIT) != 0
    }

    pub fn set_pac_error(&mut self) {
        self.0 |= 1 << PAC_STATUS_SHIFT;
    }

    pub fn pac_error(&self) -> bool {
        self.0 & (BME_STATUS_MASK << PAC_STATUS_SHIFT) != 0
    }

    pub fn set_cam_error(&mut self, code: u8) {
        self.0 &= !(CAM_STATUS_MASK << CAM_STATUS_SHIFT);
        self.0 |= (code as u32 & CAM_STATUS_MASK) << CAM_STATUS_SHIFT;
    }

    pub fn cam_error(&self) -> bool {
        self.0 & (CAM_STATUS_MASK << CAM_STATUS_SHIFT) != 0
    }

    fn bme_shift(slot: BmeSlot) -> u32 {
        BME_ALL_STATUS_SHIFT + slot as u32 * BME_STATUS_BITS
    }

    pub fn set_bme_status(&mut self, slot: BmeSlot, status: SensorStatus) {
        let shift = Self::bme_shift(slot);
        self.0 &= !(BME_STATUS_MASK << shift);
        self.0 |= (status as u32) << shift;
    }

    pub fn bme_status(&self, slot: BmeSlot) -> SensorStatus {
        SensorStatus::from_bits(self.0 >> Self::bme_shift(slot))
    }
}

/// One immutable telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryPoint {
    /// Serial id, strictly increasing across resets
    pub id: u32,
    /// Reset counter
    pub reset_count: u16,
    /// System time in seconds since boot
    pub sys_time: u32,
    /// GPS epoch time in seconds, 0 when no fix
    pub gps_time: u32,

    pub gps_state: GpsState,
    /// Satellites used for solution
    pub gps_sats: u8,
    /// Time to first fix in seconds
    pub gps_ttff: u8,
    /// Position DOP in 0.05 per unit
    pub gps_pdop: u8,
    /// Altitude in meters
    pub gps_alt: u16,
    /// Latitude in 1e-7 degree per unit
    pub gps_lat: i32,
    /// Longitude in 1e-7 degree per unit
    pub gps_lon: i32,

    /// Battery voltage from ADC in mV
    pub adc_vbat: u16,
    /// Solar voltage from ADC in mV
    pub adc_vsol: u16,
    /// Battery voltage from PAC1720 in mV
    pub pac_vbat: u16,
    /// Solar voltage from PAC1720 in mV
    pub pac_vsol: u16,
    /// Battery power in mW, negative while discharging
    pub pac_pbat: i16,
    /// Solar power in mW
    pub pac_psol: i16,
    pub light_intensity: u16,

    /// Air pressure in 0.1 Pa per unit, one per BME slot
    pub sen_press: [u32; 3],
    /// Temperature in 0.01 degC per unit
    pub sen_temp: [i16; 3],
    /// Relative humidity in %
    pub sen_hum: [u8; 3],

    /// MCU die temperature in 0.01 degC
    pub stm32_temp: i16,
    /// Transceiver die temperature in 0.01 degC
    pub si446x_temp: i16,

    pub sys_error: SysError,
    /// GPIO line snapshot
    pub gpio: u8,
}

impl TelemetryPoint {
    /// All-zero point used before the first collector cycle.
    pub const fn empty() -> Self {
        Self {
            id: 0,
            reset_count: 0,
            sys_time: 0,
            gps_time: 0,
            gps_state: GpsState::Off,
            gps_sats: 0,
            gps_ttff: 0,
            gps_pdop: 0,
            gps_alt: 0,
            gps_lat: 0,
            gps_lon: 0,
            adc_vbat: 0,
            adc_vsol: 0,
            pac_vbat: 0,
            pac_vsol: 0,
            pac_pbat: 0,
            pac_psol: 0,
            light_intensity: 0,
            sen_press: [0; 3],
            sen_temp: [0; 3],
            sen_hum: [0; 3],
            stm32_temp: 0,
            si446x_temp: 0,
            sys_error: SysError::NONE,
            gpio: 0,
        }
    }

    /// Whether this cycle ended with a usable GPS lock.
    pub fn has_lock(&self) -> bool {
        matches!(self.gps_state, GpsState::LockedOff | GpsState::LockedOn)
    }

    /// Whether the position fields hold a usable location, fresh or not.
    pub fn position_valid(&self) -> bool {
        self.has_lock()
            || matches!(
                self.gps_state,
                GpsState::FromLog | GpsState::FromAprsFix | GpsState::LowBattEarlyOff
            ) && (self.gps_lat != 0 || self.gps_lon != 0)
    }

    /// Serialize into the packed little-endian storage layout.
    pub fn to_bytes(&self) -> [u8; POINT_WIRE_LEN] {
        let mut out = [0u8; POINT_WIRE_LEN];
        let mut w = Writer::new(&mut out);
        w.u32(self.id);
        w.u16(self.reset_count);
        w.u32(self.sys_time);
        w.u32(self.gps_time);
        w.u8(self.gps_state as u8);
        w.u8(self.gps_sats);
        w.u8(self.gps_ttff);
        w.u8(self.gps_pdop);
        w.u16(self.gps_alt);
        w.i32(self.gps_lat);
        w.i32(self.gps_lon);
        w.u16(self.adc_vbat);
        w.u16(self.adc_vsol);
        w.u16(self.pac_vbat);
        w.u16(self.pac_vsol);
        w.i16(self.pac_pbat);
        w.i16(self.pac_psol);
        w.u16(self.light_intensity);
        for p in self.sen_press {
            w.u32(p);
        }
        for t in self.sen_temp {
            w.i16(t);
        }
        for h in self.sen_hum {
            w.u8(h);
        }
        w.i16(self.stm32_temp);
        w.i16(self.si446x_temp);
        w.u32(self.sys_error.0);
        w.u8(self.gpio);
        out
    }

    /// Parse the packed storage layout. Returns `None` on an invalid
    /// `gps_state` discriminant (corrupt record that passed no CRC check).
    pub fn from_bytes(buf: &[u8; POINT_WIRE_LEN]) -> Option<Self> {
        let mut r = Reader::new(buf);
        let id = r.u32();
        let reset_count = r.u16();
        let sys_time = r.u32();
        let gps_time = r.u32();
        let gps_state = GpsState::from_u8(r.u8())?;
        let gps_sats = r.u8();
        let gps_ttff = r.u8();
        let gps_pdop = r.u8();
        let gps_alt = r.u16();
        let gps_lat = r.i32();
        let gps_lon = r.i32();
        let adc_vbat = r.u16();
        let adc_vsol = r.u16();
        let pac_vbat = r.u16();
        let pac_vsol = r.u16();
        let pac_pbat = r.i16();
        let pac_psol = r.i16();
        let light_intensity = r.u16();
        let sen_press = [r.u32(), r.u32(), r.u32()];
        let sen_temp = [r.i16(), r.i16(), r.i16()];
        let sen_hum = [r.u8(), r.u8(), r.u8()];
        let stm32_temp = r.i16();
        let si446x_temp = r.i16();
        let sys_error = SysError(r.u32());
        let gpio = r.u8();
        Some(Self {
            id,
            reset_count,
            sys_time,
            gps_time,
            gps_state,
            gps_sats,
            gps_ttff,
            gps_pdop,
            gps_alt,
            gps_lat,
            gps_lon,
            adc_vbat,
            adc_vsol,
            pac_vbat,
            pac_vsol,
            pac_pbat,
            pac_psol,
            light_intensity,
            sen_press,
            sen_temp,
            sen_hum,
            stm32_temp,
            si446x_temp,
            sys_error,
            gpio,
        })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        v
    }

    fn i32(&mut self) -> i32 {
        self.u32() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryPoint {
        let mut p = TelemetryPoint::empty();
        p.id = 42;
        p.reset_count = 3;
        p.sys_time = 1234;
        p.gps_time = 1_700_000_000;
        p.gps_state = GpsState::LockedOff;
        p.gps_sats = 9;
        p.gps_ttff = 35;
        p.gps_pdop = 24;
        p.gps_alt = 12000;
        p.gps_lat = 377_749_000;
        p.gps_lon = -1_224_194_000;
        p.adc_vbat = 4100;
        p.adc_vsol = 520;
        p.pac_vbat = 4080;
        p.pac_vsol = 515;
        p.pac_pbat = -230;
        p.pac_psol = 120;
        p.sen_press = [1_012_500, 0, 0];
        p.sen_temp = [-1250, 0, 0];
        p.sen_hum = [45, 0, 0];
        p.stm32_temp = 2100;
        p.si446x_temp = 2400;
        p.gpio = 0b0000_0101;
        p
    }

    #[test]
    fn wire_roundtrip_preserves_all_fields() {
        let p = sample();
        let bytes = p.to_bytes();
        let q = TelemetryPoint::from_bytes(&bytes).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn invalid_gps_state_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[14] = 0xEE; // gps_state offset
        assert!(TelemetryPoint::from_bytes(&bytes).is_none());
    }

    #[test]
    fn bme_status_fields_are_independent() {
        let mut e = SysError::NONE;
        e.set_bme_status(BmeSlot::I1, SensorStatus::Ok);
        e.set_bme_status(BmeSlot::E1, SensorStatus::Fail);
        e.set_bme_status(BmeSlot::E2, SensorStatus::NotFitted);
        assert_eq!(e.bme_status(BmeSlot::I1), SensorStatus::Ok);
        assert_eq!(e.bme_status(BmeSlot::E1), SensorStatus::Fail);
        assert_eq!(e.bme_status(BmeSlot::E2), SensorStatus::NotFitted);
        // e2 field sits at bits 12:13
        assert_eq!(e.0 & 0x3000, 0x2000);
    }

    #[test]
    fn i2c_and_gps_bits_do_not_collide_with_bme() {
        let mut e = SysError::NONE;
        e.set_i2c_error();
        e.set_gps_error();
        assert!(e.i2c_error());
        assert!(e.gps_error());
        assert_eq!(e.bme_status(BmeSlot::I1), SensorStatus::Ok);
    }

    #[test]
    fn lock_states() {
        let mut p = TelemetryPoint::empty();
        p.gps_state = GpsState::LockedOn;
        assert!(p.has_lock());
        p.gps_state = GpsState::FromLog;
        assert!(!p.has_lock());
        p.gps_lat = 1;
        assert!(p.position_valid());
        p.gps_state = GpsState::Loss;
        assert!(!p.position_valid());
    }
}
