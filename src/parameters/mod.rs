//! Non-volatile configuration
//!
//! The full tracker configuration tree with compile-time defaults,
//! persisted to a CRC-protected flash block. A corrupt or missing block
//! falls back to the defaults at boot; runtime changes are written back
//! through [`storage::save`].

pub mod storage;

pub use storage::{load, save, ConfigError};

use crate::communication::aprs::AprsSymbol;
use crate::communication::ax25::Callsign;
use crate::core::collector::CollectorPolicy;
use crate::core::datapoint::TelemetryPoint;
use crate::devices::camera::Resolution;
use crate::devices::transceiver::Modulation;
use crate::subsystems::radio::Frequency;
use heapless::String;

/// Cycle value meaning "run continuously, no sleep between iterations".
pub const CYCLE_CONTINUOUSLY: u32 = 0;

/// Per-thread scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConf {
    pub active: bool,
    /// Seconds between cycles; [`CYCLE_CONTINUOUSLY`] loops immediately
    pub cycle_s: u32,
    /// Delay before the first cycle after boot
    pub init_delay_s: u32,
}

/// Per-thread radio settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConf {
    /// Transmit power 0..=0x7F
    pub pwr: u8,
    pub freq: Frequency,
    pub modulation: Modulation,
    /// Preamble length in flag/sync octets
    pub preamble: u16,
    /// CCA threshold in raw RSSI units, 0 disables
    pub cca_rssi: u8,
}

impl RadioConf {
    fn aprs_default() -> Self {
        Self {
            pwr: 0x7F,
            freq: Frequency::AprsRegional,
            modulation: Modulation::Afsk1200,
            preamble: 200,
            cca_rssi: 0x4F,
        }
    }
}

/// Condition under which a thread skips its cycle entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepRule {
    Disabled,
    /// Skip while battery voltage is below the threshold (mV)
    VbatBelow(u16),
    /// Skip while solar voltage is below the threshold (mV)
    VsolBelow(u16),
}

impl SleepRule {
    /// Whether the thread should skip this cycle.
    pub fn should_sleep(&self, p: &TelemetryPoint) -> bool {
        match self {
            SleepRule::Disabled => false,
            SleepRule::VbatBelow(mv) => p.adc_vbat < *mv,
            SleepRule::VsolBelow(mv) => p.adc_vsol < *mv,
        }
    }
}

/// Position beacon thread configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConf {
    pub thread: ThreadConf,
    pub radio: RadioConf,
    pub sleep: SleepRule,
    pub call: Callsign,
    pub path: String<16>,
    pub symbol: AprsSymbol,
    /// Seconds between telemetry configuration groups; 0 disables
    pub tel_enc_cycle_s: u32,
    /// Exit after one transmission cycle
    pub run_once: bool,
}

/// Image transmission thread configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConf {
    pub thread: ThreadConf,
    pub radio: RadioConf,
    pub sleep: SleepRule,
    pub call: Callsign,
    pub path: String<16>,
    pub res: Resolution,
    /// JPEG quality level 0..=7
    pub quality: u8,
    /// Per-packet transmission retries
    pub retries: u8,
}

/// Log transmission thread configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConf {
    pub thread: ThreadConf,
    pub radio: RadioConf,
    pub call: Callsign,
    pub path: String<16>,
}

/// Receiver / digipeater configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxConf {
    pub active: bool,
    pub radio: RadioConf,
    pub call: Callsign,
}

/// Base station addressing for unsolicited messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConf {
    pub enabled: bool,
    pub call: Callsign,
    pub path: String<16>,
}

/// The whole configuration tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub pos_pri: BeaconConf,
    pub pos_sec: BeaconConf,
    pub img_pri: ImageConf,
    pub img_sec: ImageConf,
    pub log: LogConf,
    pub rx: RxConf,
    pub base: BaseConf,

    /// Heard-direct window for APRSD responses, seconds
    pub aprsd_window_s: u32,
    /// Message number dedup window, seconds
    pub dedup_window_s: u32,
    pub dig_active: bool,
    pub keep_cam_switched_on: bool,

    /// GPS battery policy, mV
    pub gps_on_vbat: u16,
    pub gps_off_vbat: u16,
    pub gps_onper_vbat: u16,

    /// Without a fresh fix for this long, beacons carry the last known
    /// position as `FromLog`, seconds
    pub log_fallback_window_s: u32,

    /// Watchdog heartbeat timeout, seconds
    pub wdg_timeout_s: u32,
}

fn call(text: &str) -> Callsign {
    Callsign::parse(text).unwrap_or(Callsign::NOCALL)
}

fn path(text: &str) -> String<16> {
    let mut s = String::new();
    let _ = s.push_str(text);
    s
}

impl Default for Config {
    fn default() -> Self {
        let beacon = BeaconConf {
            thread: ThreadConf {
                active: true,
                cycle_s: 120,
                init_delay_s: 10,
            },
            radio: RadioConf::aprs_default(),
            sleep: SleepRule::Disabled,
            call: call("DL7AD-12"),
            path: path("WIDE1-1"),
            symbol: AprsSymbol::Balloon,
            tel_enc_cycle_s: 10_800,
            run_once: false,
        };
        let image = ImageConf {
            thread: ThreadConf {
                active: false,
                cycle_s: CYCLE_CONTINUOUSLY,
                init_delay_s: 60,
            },
            radio: RadioConf::aprs_default(),
            sleep: SleepRule::Disabled,
            call: call("DL7AD-14"),
            path: path(""),
            res: Resolution::Qvga,
            quality: 4,
            retries: 3,
        };
        Self {
            pos_pri: beacon.clone(),
            pos_sec: BeaconConf {
                thread: ThreadConf {
                    active: false,
                    ..beacon.thread.clone()
                },
                ..beacon.clone()
            },
            img_pri: image.clone(),
            img_sec: ImageConf {
                res: Resolution::Vga,
                ..image.clone()
            },
            log: LogConf {
                thread: ThreadConf {
                    active: false,
                    cycle_s: 120,
                    init_delay_s: 30,
                },
                radio: RadioConf::aprs_default(),
                call: call("DL7AD-12"),
                path: path("WIDE1-1"),
            },
            rx: RxConf {
                active: false,
                radio: RadioConf::aprs_default(),
                call: call("DL7AD-14"),
            },
            base: BaseConf {
                enabled: false,
                call: Callsign::NOCALL,
                path: path("WIDE1-1"),
            },
            aprsd_window_s: 600,
            dedup_window_s: 30,
            dig_active: false,
            keep_cam_switched_on: false,
            gps_on_vbat: 3000,
            gps_off_vbat: 2500,
            gps_onper_vbat: 2700,
            log_fallback_window_s: 1800,
            wdg_timeout_s: 600,
        }
    }
}

impl Config {
    /// Collector policy slice of the configuration.
    pub fn collector_policy(&self) -> CollectorPolicy {
        CollectorPolicy {
            gps_off_vbat: self.gps_off_vbat,
            gps_on_vbat: self.gps_on_vbat,
            gps_onper_vbat: self.gps_onper_vbat,
            log_fallback_window_s: self.log_fallback_window_s,
            ..CollectorPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flight_configuration() {
        let c = Config::default();
        assert!(c.pos_pri.thread.active);
        assert_eq!(c.pos_pri.thread.cycle_s, 120);
        assert_eq!(c.pos_pri.tel_enc_cycle_s, 10_800);
        assert_eq!(c.pos_pri.call.format().as_str(), "DL7AD-12");
        assert_eq!(c.pos_pri.path.as_str(), "WIDE1-1");
        assert_eq!(c.pos_pri.radio.pwr, 0x7F);
        assert_eq!(c.pos_pri.radio.preamble, 200);
        assert!(!c.pos_sec.thread.active);
        assert_eq!(c.img_pri.quality, 4);
        assert!(!c.dig_active);
        assert_eq!(c.log_fallback_window_s, 1800);
    }

    #[test]
    fn sleep_rules() {
        let mut p = TelemetryPoint::empty();
        p.adc_vbat = 3500;
        p.adc_vsol = 100;
        assert!(!SleepRule::Disabled.should_sleep(&p));
        assert!(SleepRule::VbatBelow(3600).should_sleep(&p));
        assert!(!SleepRule::VbatBelow(3400).should_sleep(&p));
        assert!(SleepRule::VsolBelow(500).should_sleep(&p));
    }
}
