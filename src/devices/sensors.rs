//! Environment and power sensor facade
//!
//! Uniform read access to the PAC1720 power meter, the MCU ADC rails, the
//! three BME280 slots and the chip thermal sensors. All reads go over the
//! shared I2C bus; implementations serialize bus access internally.

use crate::core::datapoint::BmeSlot;
use crate::platform::Result;

/// PAC1720 measurement set.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacReadings {
    pub vbat_mv: u16,
    pub vsol_mv: u16,
    /// Battery power in mW, negative while discharging
    pub pbat_mw: i16,
    pub psol_mw: i16,
}

/// MCU ADC measurement set.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcReadings {
    pub vbat_mv: u16,
    pub vsol_mv: u16,
    pub light_intensity: u16,
}

/// One BME280 sample.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvReading {
    /// Air pressure in 0.1 Pa
    pub press: u32,
    /// Temperature in 0.01 degC
    pub temp: i16,
    /// Relative humidity in %
    pub hum: u8,
}

/// Die temperature pair.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipTemps {
    /// MCU die temperature in 0.01 degC
    pub stm32: i16,
    /// Transceiver die temperature in 0.01 degC
    pub si446x: i16,
}

/// Outcome of reading one BME slot.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnvResult {
    Ok(EnvReading),
    Fail,
    NotFitted,
}

/// Aggregated sensor access for the collector.
pub trait SensorHub {
    fn read_pac(&mut self) -> Result<PacReadings>;

    fn read_adc(&mut self) -> Result<AdcReadings>;

    /// Read one BME280 slot. Never fails the cycle; a broken or absent
    /// sensor is reported in the result.
    fn read_env(&mut self, slot: BmeSlot) -> EnvResult;

    fn read_chip_temps(&mut self) -> Result<ChipTemps>;

    /// Snapshot of the GPIO lines carried in telemetry.
    fn read_gpio(&mut self) -> u8;
}

/// Fixed-value hub for host tests.
pub struct MockSensorHub {
    pub pac: PacReadings,
    pub adc: AdcReadings,
    pub env: [EnvResult; 3],
    pub temps: ChipTemps,
    pub gpio: u8,
    pub pac_fails: bool,
}

impl Default for MockSensorHub {
    fn default() -> Self {
        Self {
            pac: PacReadings::default(),
            adc: AdcReadings::default(),
            env: [
                EnvResult::Ok(EnvReading::default()),
                EnvResult::NotFitted,
                EnvResult::NotFitted,
            ],
            temps: ChipTemps::default(),
            gpio: 0,
            pac_fails: false,
        }
    }
}

impl SensorHub for MockSensorHub {
    fn read_pac(&mut self) -> Result<PacReadings> {
        use crate::platform::{I2cError, PlatformError};
        if self.pac_fails {
            Err(PlatformError::I2c(I2cError::Nack))
        } else {
            Ok(self.pac)
        }
    }

    fn read_adc(&mut self) -> Result<AdcReadings> {
        Ok(self.adc)
    }

    fn read_env(&mut self, slot: BmeSlot) -> EnvResult {
        self.env[slot as usize]
    }

    fn read_chip_temps(&mut self) -> Result<ChipTemps> {
        Ok(self.temps)
    }

    fn read_gpio(&mut self) -> u8 {
        self.gpio
    }
}
