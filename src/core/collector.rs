//! Data collector
//!
//! Single writer of [`TelemetryPoint`]s. Application threads request a
//! snapshot with their intent (whether they need GPS); the collector
//! refreshes when stale, appends every new point to the flash log ring
//! and publishes it on a watch channel that readers block on.
//!
//! The sampling logic is synchronous and host-testable
//! ([`CollectorCore`]); only GPS acquisition waits, in [`acquire_gps`].
//!
//! # GPS battery policy
//!
//! - below `gps_off_vbat` the receiver is never powered
//! - above `gps_on_vbat` it may be powered when a subscriber needs it
//! - falling below `gps_onper_vbat` mid-acquisition powers it off early

use crate::core::datapoint::{BmeSlot, GpsState, SensorStatus, SysError, TelemetryPoint};
use crate::devices::gps::{Gps, GpsFix};
use crate::devices::sensors::{EnvResult, SensorHub};
use crate::platform::traits::Clock;
use crate::platform::FlashInterface;
use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::watch::Watch;
use embassy_time::{with_timeout, Duration, Timer};

/// Maximum concurrent snapshot subscribers (beacon x2, image x2, log).
pub const MAX_SUBSCRIBERS: usize = 5;

bitflags! {
    /// What a requesting thread needs from this cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppIntent: u8 {
        /// The caller transmits position; acquire a GPS fix if possible
        const REQUIRES_GPS = 0b0000_0001;
        /// Leave the receiver running after the fix (hot restarts)
        const KEEP_GPS_ON = 0b0000_0010;
    }
}

/// Collector policy knobs, loaded from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CollectorPolicy {
    /// Below this battery voltage the GPS stays off (mV)
    pub gps_off_vbat: u16,
    /// At or above this voltage the GPS may power on (mV)
    pub gps_on_vbat: u16,
    /// Below this voltage a running acquisition is aborted (mV)
    pub gps_onper_vbat: u16,
    /// Fix acquisition window in seconds
    pub gps_window_s: u32,
    /// A snapshot younger than this is served without refreshing
    pub fresh_window_s: u32,
    /// Without a fresh fix for this long, the carried position degrades
    /// to `FromLog` instead of `Loss`/`Error`
    pub log_fallback_window_s: u32,
}

impl Default for CollectorPolicy {
    fn default() -> Self {
        Self {
            gps_off_vbat: 3000,
            gps_on_vbat: 3000,
            gps_onper_vbat: 3000,
            gps_window_s: 120,
            fresh_window_s: 10,
            log_fallback_window_s: 1800,
        }
    }
}

/// Outcome of the GPS phase of one cycle.
#[derive(Debug, Clone, Copy)]
pub enum GpsOutcome {
    /// Fix acquired; `kept_on` when the receiver stays powered
    Fix {
        fix: GpsFix,
        ttff_s: u8,
        kept_on: bool,
    },
    /// Window elapsed without a fix
    Timeout,
    /// Receiver communication failed
    CommError,
    /// Battery too low to power the receiver at all
    LowBattNeverOn,
    /// Aborted mid-acquisition on battery sag
    EarlyOff(Option<GpsFix>),
    /// No subscriber asked for GPS this cycle
    NotRequested,
}

/// GPS phase decision from the battery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsDecision {
    Acquire,
    SkipLowBatt,
    NotRequested,
}

/// Synchronous collector state machine.
pub struct CollectorCore<G, S, C> {
    pub gps: G,
    pub sensors: S,
    pub clock: C,
    policy: CollectorPolicy,
    last: TelemetryPoint,
    /// System time of the last fresh fix; `None` until one arrives this
    /// boot (a log-seeded position stays `FromLog` until then)
    last_fix_time: Option<u32>,
    reset_count: u16,
}

impl<G: Gps, S: SensorHub, C: Clock> CollectorCore<G, S, C> {
    /// `seed` is the last log record, if any; its position carries over
    /// with `gps_state = FromLog` until a live fix replaces it.
    pub fn new(
        gps: G,
        sensors: S,
        clock: C,
        policy: CollectorPolicy,
        seed: Option<TelemetryPoint>,
        reset_count: u16,
    ) -> Self {
        let last = match seed {
            Some(mut p) => {
                p.gps_state = GpsState::FromLog;
                p
            }
            None => TelemetryPoint::empty(),
        };
        Self {
            gps,
            sensors,
            clock,
            policy,
            last,
            last_fix_time: None,
            reset_count,
        }
    }

    pub fn latest(&self) -> &TelemetryPoint {
        &self.last
    }

    pub fn policy(&self) -> &CollectorPolicy {
        &self.policy
    }

    /// Whether the last snapshot is fresh enough to serve as-is.
    pub fn is_fresh(&self) -> bool {
        self.last.id != 0
            && self
                .clock
                .now_secs()
                .saturating_sub(self.last.sys_time)
                < self.policy.fresh_window_s
    }

    /// Battery policy for the GPS phase.
    pub fn gps_decision(&self, intent: AppIntent, vbat_mv: u16) -> GpsDecision {
        if !intent.contains(AppIntent::REQUIRES_GPS) {
            return GpsDecision::NotRequested;
        }
        if vbat_mv < self.policy.gps_off_vbat || vbat_mv < self.policy.gps_on_vbat {
            return GpsDecision::SkipLowBatt;
        }
        GpsDecision::Acquire
    }

    /// Build and publish the cycle's point from the GPS outcome and a full
    /// sensor sweep. Sensor failures mark status bits, never abort.
    /// `camera_error` is the last fault code reported by the image thread
    /// (0 = healthy).
    pub fn complete_cycle(&mut self, gps: GpsOutcome, camera_error: u8) -> TelemetryPoint {
        let mut p = TelemetryPoint::empty();
        p.id = self.last.id.wrapping_add(1);
        p.reset_count = self.reset_count;
        p.sys_time = self.clock.now_secs();
        let mut err = SysError::NONE;
        if camera_error != 0 {
            err.set_cam_error(camera_error);
        }

        self.apply_gps(&mut p, &mut err, gps);
        self.read_sensors(&mut p, &mut err);

        p.sys_error = err;
        self.last = p;
        p
    }

    fn apply_gps(&mut self, p: &mut TelemetryPoint, err: &mut SysError, gps: GpsOutcome) {
        match gps {
            GpsOutcome::Fix {
                fix,
                ttff_s,
                kept_on,
            } => {
                p.gps_state = if kept_on {
                    GpsState::LockedOn
                } else {
                    GpsState::LockedOff
                };
                p.gps_time = fix.time;
                p.gps_lat = fix.lat;
                p.gps_lon = fix.lon;
                p.gps_alt = fix.alt;
                p.gps_sats = fix.sats;
                p.gps_pdop = fix.pdop;
                p.gps_ttff = ttff_s;
                self.last_fix_time = Some(p.sys_time);
            }
            GpsOutcome::EarlyOff(Some(fix)) => {
                p.gps_state = GpsState::LowBattEarlyOff;
                p.gps_time = fix.time;
                p.gps_lat = fix.lat;
                p.gps_lon = fix.lon;
                p.gps_alt = fix.alt;
                p.gps_sats = fix.sats;
                p.gps_pdop = fix.pdop;
                self.last_fix_time = Some(p.sys_time);
            }
            outcome => {
                // carry the last known position for frequency resolution
                p.gps_time = self.last.gps_time;
                p.gps_lat = self.last.gps_lat;
                p.gps_lon = self.last.gps_lon;
                p.gps_alt = self.last.gps_alt;
                p.gps_state = match outcome {
                    GpsOutcome::Timeout => self.degraded_state(p.sys_time, GpsState::Loss),
                    GpsOutcome::CommError => {
                        err.set_gps_error();
                        self.degraded_state(p.sys_time, GpsState::Error)
                    }
                    GpsOutcome::LowBattNeverOn => GpsState::LowBattNeverOn,
                    GpsOutcome::EarlyOff(None) => GpsState::LowBattEarlyOff,
                    GpsOutcome::NotRequested => match self.last.gps_state {
                        GpsState::Off => GpsState::Off,
                        s => s,
                    },
                    GpsOutcome::Fix { .. } | GpsOutcome::EarlyOff(Some(_)) => unreachable!(),
                };
            }
        }
    }

    /// Failure state for a cycle without a fix. A recent fix keeps the
    /// fresh failure kind; once no fresh fix has been seen for the log
    /// fallback window, the carried position is only log-grade and the
    /// state degrades to `FromLog`. A log-seeded position stays
    /// `FromLog` until the first fix of this boot.
    fn degraded_state(&self, now_s: u32, fresh_failure: GpsState) -> GpsState {
        match self.last_fix_time {
            Some(at) if now_s.saturating_sub(at) < self.policy.log_fallback_window_s => {
                fresh_failure
            }
            Some(_) => GpsState::FromLog,
            None if matches!(self.last.gps_state, GpsState::FromLog) => GpsState::FromLog,
            None => fresh_failure,
        }
    }

    fn read_sensors(&mut self, p: &mut TelemetryPoint, err: &mut SysError) {
        match self.sensors.read_pac() {
            Ok(pac) => {
                p.pac_vbat = pac.vbat_mv;
                p.pac_vsol = pac.vsol_mv;
                p.pac_pbat = pac.pbat_mw;
                p.pac_psol = pac.psol_mw;
            }
            Err(_) => {
                err.set_pac_error();
                err.set_i2c_error();
            }
        }
        match self.sensors.read_adc() {
            Ok(adc) => {
                p.adc_vbat = adc.vbat_mv;
                p.adc_vsol = adc.vsol_mv;
                p.light_intensity = adc.light_intensity;
            }
            Err(_) => err.set_i2c_error(),
        }
        // strict slot order: i1, e1, e2
        for slot in [BmeSlot::I1, BmeSlot::E1, BmeSlot::E2] {
            match self.sensors.read_env(slot) {
                EnvResult::Ok(r) => {
                    err.set_bme_status(slot, SensorStatus::Ok);
                    p.sen_press[slot as usize] = r.press;
                    p.sen_temp[slot as usize] = r.temp;
                    p.sen_hum[slot as usize] = r.hum;
                }
                EnvResult::Fail => {
                    err.set_bme_status(slot, SensorStatus::Fail);
                    err.set_i2c_error();
                }
                EnvResult::NotFitted => {
                    err.set_bme_status(slot, SensorStatus::NotFitted);
                }
            }
        }
        match self.sensors.read_chip_temps() {
            Ok(t) => {
                p.stm32_temp = t.stm32;
                p.si446x_temp = t.si446x;
            }
            Err(_) => err.set_i2c_error(),
        }
        p.gpio = self.sensors.read_gpio();
    }
}

/// Run the GPS phase: apply the battery policy, then poll for a fix once
/// per second until lock, battery sag or window expiry.
pub async fn acquire_gps<G: Gps, S: SensorHub, C: Clock>(
    core: &mut CollectorCore<G, S, C>,
    intent: AppIntent,
) -> GpsOutcome {
    let vbat = core
        .sensors
        .read_adc()
        .map(|a| a.vbat_mv)
        .unwrap_or(0);
    match core.gps_decision(intent, vbat) {
        GpsDecision::NotRequested => return GpsOutcome::NotRequested,
        GpsDecision::SkipLowBatt => return GpsOutcome::LowBattNeverOn,
        GpsDecision::Acquire => {}
    }
    if core.gps.power_on().is_err() {
        return GpsOutcome::CommError;
    }
    let window = core.policy.gps_window_s;
    for elapsed in 0..window {
        match core.gps.poll_fix() {
            Ok(Some(fix)) => {
                let kept_on = intent.contains(AppIntent::KEEP_GPS_ON);
                if !kept_on {
                    core.gps.power_off();
                }
                return GpsOutcome::Fix {
                    fix,
                    ttff_s: elapsed.min(u8::MAX as u32) as u8,
                    kept_on,
                };
            }
            Ok(None) => {}
            Err(_) => {
                core.gps.power_off();
                return GpsOutcome::CommError;
            }
        }
        let vbat = core
            .sensors
            .read_adc()
            .map(|a| a.vbat_mv)
            .unwrap_or(0);
        if vbat < core.policy.gps_onper_vbat {
            core.gps.power_off();
            return GpsOutcome::EarlyOff(None);
        }
        Timer::after(Duration::from_secs(1)).await;
    }
    core.gps.power_off();
    GpsOutcome::Timeout
}

/// Static channel set wiring the collector to its subscribers.
pub struct CollectorChannels {
    /// Snapshot requests carrying the caller's intent
    pub requests: Channel<CriticalSectionRawMutex, AppIntent, 4>,
    /// Every published point; readers block on `changed()`
    pub published: Watch<CriticalSectionRawMutex, TelemetryPoint, MAX_SUBSCRIBERS>,
    /// Camera fault code from the image thread, folded into `sys_error`
    pub camera_error: core::sync::atomic::AtomicU8,
}

impl CollectorChannels {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            published: Watch::new(),
            camera_error: core::sync::atomic::AtomicU8::new(0),
        }
    }

    /// Synchronous snapshot request: send intent, wait for the collector
    /// to answer on the watch.
    pub async fn request_snapshot(
        &self,
        rcv: &mut embassy_sync::watch::Receiver<'_, CriticalSectionRawMutex, TelemetryPoint, MAX_SUBSCRIBERS>,
        intent: AppIntent,
    ) -> TelemetryPoint {
        self.requests.send(intent).await;
        rcv.changed().await
    }
}

impl Default for CollectorChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Collector thread: serve snapshot requests, refresh when stale, sample
/// autonomously every `cycle` when nobody asks, persist each point.
pub async fn collector_task<G: Gps, S: SensorHub, C: Clock, F: FlashInterface>(
    mut core: CollectorCore<G, S, C>,
    ring: &crate::core::log_ring::SharedLogRing<F>,
    channels: &CollectorChannels,
    cycle: Duration,
) -> ! {
    let sender = channels.published.sender();
    loop {
        let intent = match with_timeout(cycle, channels.requests.receive()).await {
            Ok(intent) => intent,
            Err(_) => AppIntent::empty(),
        };
        if core.is_fresh() && !intent.contains(AppIntent::REQUIRES_GPS) {
            sender.send(*core.latest());
            continue;
        }
        let gps = acquire_gps(&mut core, intent).await;
        let cam = channels
            .camera_error
            .load(core::sync::atomic::Ordering::Acquire);
        let point = core.complete_cycle(gps, cam);
        let appended = ring.lock(|r| r.borrow_mut().append(&point));
        if let Err(e) = appended {
            crate::log_warn!("collector: log append failed: {}", e);
            let _ = e;
        }
        sender.send(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::gps::MockGps;
    use crate::devices::sensors::{EnvReading, MockSensorHub, PacReadings};
    use crate::platform::mock::MockClock;

    fn fix() -> GpsFix {
        GpsFix {
            time: 1_700_000_000,
            lat: 377_749_000,
            lon: -1_224_194_000,
            alt: 500,
            sats: 8,
            pdop: 30,
        }
    }

    fn core_with(
        gps: MockGps,
        sensors: MockSensorHub,
        seed: Option<TelemetryPoint>,
    ) -> CollectorCore<MockGps, MockSensorHub, MockClock> {
        CollectorCore::new(
            gps,
            sensors,
            MockClock::new(100),
            CollectorPolicy::default(),
            seed,
            1,
        )
    }

    fn hub_ok() -> MockSensorHub {
        let mut hub = MockSensorHub::default();
        hub.adc.vbat_mv = 4100;
        hub.pac = PacReadings {
            vbat_mv: 4080,
            vsol_mv: 510,
            pbat_mw: -210,
            psol_mw: 90,
        };
        hub.env[0] = EnvResult::Ok(EnvReading {
            press: 1_012_500,
            temp: 2150,
            hum: 40,
        });
        hub
    }

    #[test]
    fn ids_strictly_increase() {
        let mut c = core_with(MockGps::never_locks(), hub_ok(), None);
        let a = c.complete_cycle(GpsOutcome::NotRequested, 0);
        let b = c.complete_cycle(GpsOutcome::NotRequested, 0);
        assert!(b.id > a.id);
        assert!(b.sys_time >= a.sys_time);
    }

    #[test]
    fn fix_populates_position_and_lock_state() {
        let mut c = core_with(MockGps::locks_after(1, fix()), hub_ok(), None);
        let p = c.complete_cycle(
            GpsOutcome::Fix {
                fix: fix(),
                ttff_s: 30,
                kept_on: false,
            },
            0,
        );
        assert_eq!(p.gps_state, GpsState::LockedOff);
        assert!(p.has_lock());
        assert_eq!(p.gps_lat, 377_749_000);
        assert_eq!(p.gps_ttff, 30);
    }

    #[test]
    fn loss_carries_last_position() {
        let mut c = core_with(MockGps::never_locks(), hub_ok(), None);
        c.complete_cycle(
            GpsOutcome::Fix {
                fix: fix(),
                ttff_s: 10,
                kept_on: false,
            },
            0,
        );
        let p = c.complete_cycle(GpsOutcome::Timeout, 0);
        assert_eq!(p.gps_state, GpsState::Loss);
        assert_eq!(p.gps_lat, 377_749_000);
    }

    #[test]
    fn stale_position_degrades_to_from_log_after_window() {
        let mut c = core_with(MockGps::never_locks(), hub_ok(), None);
        c.complete_cycle(
            GpsOutcome::Fix {
                fix: fix(),
                ttff_s: 10,
                kept_on: false,
            },
            0,
        );
        // within the fallback window a missing fix is a plain loss
        let p = c.complete_cycle(GpsOutcome::Timeout, 0);
        assert_eq!(p.gps_state, GpsState::Loss);
        // past the window the carried position is only log-grade
        c.clock.advance(2_000);
        let p = c.complete_cycle(GpsOutcome::Timeout, 0);
        assert_eq!(p.gps_state, GpsState::FromLog);
        assert_eq!(p.gps_lat, 377_749_000);
        // a new fix resets the window
        c.complete_cycle(
            GpsOutcome::Fix {
                fix: fix(),
                ttff_s: 5,
                kept_on: false,
            },
            0,
        );
        let p = c.complete_cycle(GpsOutcome::Timeout, 0);
        assert_eq!(p.gps_state, GpsState::Loss);
    }

    #[test]
    fn log_seed_degrades_to_from_log_not_loss() {
        let mut seed = TelemetryPoint::empty();
        seed.id = 99;
        seed.gps_lat = 481_000_000;
        seed.gps_lon = 91_000_000;
        let mut c = core_with(MockGps::never_locks(), hub_ok(), Some(seed));
        let p = c.complete_cycle(GpsOutcome::Timeout, 0);
        assert_eq!(p.gps_state, GpsState::FromLog);
        assert_eq!(p.gps_lat, 481_000_000);
        assert_eq!(p.id, 100);
    }

    #[test]
    fn comm_error_sets_gps_error_bit() {
        let mut c = core_with(MockGps::never_locks(), hub_ok(), None);
        let p = c.complete_cycle(GpsOutcome::CommError, 0);
        assert_eq!(p.gps_state, GpsState::Error);
        assert!(p.sys_error.gps_error());
    }

    #[test]
    fn pac_failure_marks_bits_but_cycle_completes() {
        let mut hub = hub_ok();
        hub.pac_fails = true;
        let mut c = core_with(MockGps::never_locks(), hub, None);
        let p = c.complete_cycle(GpsOutcome::NotRequested, 0);
        assert!(p.sys_error.pac_error());
        assert!(p.sys_error.i2c_error());
        // ADC still read
        assert_eq!(p.adc_vbat, 4100);
    }

    #[test]
    fn bme_statuses_recorded_per_slot() {
        let mut hub = hub_ok();
        hub.env[1] = EnvResult::Fail;
        hub.env[2] = EnvResult::NotFitted;
        let mut c = core_with(MockGps::never_locks(), hub, None);
        let p = c.complete_cycle(GpsOutcome::NotRequested, 0);
        assert_eq!(p.sys_error.bme_status(BmeSlot::I1), SensorStatus::Ok);
        assert_eq!(p.sys_error.bme_status(BmeSlot::E1), SensorStatus::Fail);
        assert_eq!(p.sys_error.bme_status(BmeSlot::E2), SensorStatus::NotFitted);
        assert_eq!(p.sen_press[0], 1_012_500);
        // failed slot carries no values
        assert_eq!(p.sen_press[1], 0);
    }

    #[test]
    fn camera_fault_code_lands_in_sys_error() {
        let mut c = core_with(MockGps::never_locks(), hub_ok(), None);
        let p = c.complete_cycle(GpsOutcome::NotRequested, 2);
        assert!(p.sys_error.cam_error());
        let p = c.complete_cycle(GpsOutcome::NotRequested, 0);
        assert!(!p.sys_error.cam_error());
    }

    #[test]
    fn gps_decision_respects_battery_policy() {
        let c = core_with(MockGps::never_locks(), hub_ok(), None);
        let want = AppIntent::REQUIRES_GPS;
        assert_eq!(c.gps_decision(want, 4100), GpsDecision::Acquire);
        assert_eq!(c.gps_decision(want, 2900), GpsDecision::SkipLowBatt);
        assert_eq!(
            c.gps_decision(AppIntent::empty(), 4100),
            GpsDecision::NotRequested
        );
    }
}
