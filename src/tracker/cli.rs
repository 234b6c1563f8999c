//! Debug console
//!
//! Line-based command shell on the debug serial port (115200 8N1). The
//! parsing and immediate responses are synchronous; commands that need a
//! device or the radio return a [`ShellAction`] the console task
//! executes.

use crate::communication::ax25::Callsign;
use crate::core::log_ring::SharedLogRing;
use crate::parameters::Config;
use crate::platform::FlashInterface;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::String;

/// Deferred work for the console task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    None,
    /// Queue an APRS message through the radio manager
    SendMessage {
        dest: Callsign,
        text: String<67>,
    },
    /// Capture a JPEG and stream it over the console
    CapturePicture,
    /// Raw register write to the camera
    CameraCommand { reg: u16, value: u16 },
    /// Dump received frames for a while
    TestRx { seconds: u32 },
}

pub struct Shell<'a, F: FlashInterface> {
    pub config: &'a Config,
    pub ring: &'a SharedLogRing<F>,
    pub debug_on_usb: &'a AtomicBool,
}

impl<'a, F: FlashInterface> Shell<'a, F> {
    /// Parse and execute one console line.
    pub fn handle_line(&mut self, line: &str, out: &mut impl Write) -> ShellAction {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return ShellAction::None;
        };
        match command {
            "debugOnUSB" => self.debug_on_usb_cmd(args.next(), out),
            "printConfig" => self.print_config(out),
            "readLog" => self.read_log(args.next(), out),
            "send_aprs_message" => self.send_message(args, line, out),
            "printPicture" => ShellAction::CapturePicture,
            "command2Camera" => self.camera_command(args.next(), args.next(), out),
            "test_rx" => {
                let seconds = args.next().and_then(|a| a.parse().ok()).unwrap_or(10);
                ShellAction::TestRx { seconds }
            }
            _ => {
                let _ = writeln!(out, "Unknown command: {}", command);
                ShellAction::None
            }
        }
    }

    fn debug_on_usb_cmd(&mut self, arg: Option<&str>, out: &mut impl Write) -> ShellAction {
        match arg.and_then(|a| a.parse::<u8>().ok()) {
            Some(v) => self.debug_on_usb.store(v != 0, Ordering::Release),
            None => {
                let _ = writeln!(out, "Argument missing!");
                let _ = writeln!(out, "Argument 1: 1 for switch on, 0 for switch off");
            }
        }
        ShellAction::None
    }

    fn print_config(&self, out: &mut impl Write) -> ShellAction {
        let c = self.config;
        let _ = writeln!(out, "Position primary:");
        let _ = writeln!(
            out,
            "  call {} path {} cycle {}s telemetry {}s",
            c.pos_pri.call.format(),
            c.pos_pri.path,
            c.pos_pri.thread.cycle_s,
            c.pos_pri.tel_enc_cycle_s
        );
        let _ = writeln!(
            out,
            "  pwr 0x{:02X} preamble {} cca 0x{:02X}",
            c.pos_pri.radio.pwr, c.pos_pri.radio.preamble, c.pos_pri.radio.cca_rssi
        );
        let _ = writeln!(
            out,
            "Image primary: call {} active {} quality {}",
            c.img_pri.call.format(),
            c.img_pri.thread.active,
            c.img_pri.quality
        );
        let _ = writeln!(
            out,
            "Digipeater {} / RX {}",
            c.dig_active, c.rx.active
        );
        let _ = writeln!(
            out,
            "GPS vbat on/off/onper: {}/{}/{} mV",
            c.gps_on_vbat, c.gps_off_vbat, c.gps_onper_vbat
        );
        ShellAction::None
    }

    fn read_log(&self, arg: Option<&str>, out: &mut impl Write) -> ShellAction {
        self.ring.lock(|r| {
            let mut r = r.borrow_mut();
            match arg.and_then(|a| a.parse::<u32>().ok()) {
                None => {
                    let _ = writeln!(out, "Log records: {}", r.len());
                }
                Some(index) => match r.get(index) {
                    Some(p) => {
                        let _ = writeln!(
                            out,
                            "id {} time {}s reset {} state {:?}",
                            p.id, p.sys_time, p.reset_count, p.gps_state
                        );
                        let _ = writeln!(
                            out,
                            "  lat {} lon {} alt {}m sats {}",
                            p.gps_lat, p.gps_lon, p.gps_alt, p.gps_sats
                        );
                        let _ = writeln!(
                            out,
                            "  vbat {}mV vsol {}mV pbat {}mW",
                            p.adc_vbat, p.adc_vsol, p.pac_pbat
                        );
                    }
                    None => {
                        let _ = writeln!(out, "No record at index {}", index);
                    }
                },
            }
        });
        ShellAction::None
    }

    fn send_message<'l>(
        &self,
        mut args: impl Iterator<Item = &'l str>,
        line: &'l str,
        out: &mut impl Write,
    ) -> ShellAction {
        let Some(dest) = args.next() else {
            let _ = writeln!(out, "Usage: send_aprs_message <dest> <text>");
            return ShellAction::None;
        };
        let Ok(dest) = Callsign::parse(dest) else {
            let _ = writeln!(out, "Invalid destination callsign");
            return ShellAction::None;
        };
        // message text is the remainder of the line, spaces preserved
        let text_start = line
            .find(dest.base())
            .map(|p| p + line[p..].find(' ').unwrap_or(line.len() - p))
            .unwrap_or(line.len());
        let text = line[text_start..].trim();
        if text.is_empty() {
            let _ = writeln!(out, "Usage: send_aprs_message <dest> <text>");
            return ShellAction::None;
        }
        let mut msg = String::new();
        for c in text.chars().take(67) {
            let _ = msg.push(c);
        }
        ShellAction::SendMessage { dest, text: msg }
    }

    fn camera_command(
        &self,
        reg: Option<&str>,
        value: Option<&str>,
        out: &mut impl Write,
    ) -> ShellAction {
        let parse = |s: &str| {
            u16::from_str_radix(s.trim_start_matches("0x"), 16).ok()
        };
        match (reg.and_then(parse), value.and_then(parse)) {
            (Some(reg), Some(value)) => ShellAction::CameraCommand { reg, value },
            _ => {
                let _ = writeln!(out, "Usage: command2Camera <reg-hex> <value-hex>");
                ShellAction::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_ring::LogRing;
    use crate::platform::mock::MockFlash;
    use core::cell::RefCell;
    use embassy_sync::blocking_mutex::Mutex;

    fn ring() -> SharedLogRing<MockFlash<8192>> {
        let mut ring = LogRing::mount(MockFlash::new(4096), 0, 8192).unwrap();
        let mut p = crate::core::datapoint::TelemetryPoint::empty();
        p.id = 7;
        p.adc_vbat = 4100;
        p.gps_state = crate::core::datapoint::GpsState::LockedOff;
        ring.append(&p).unwrap();
        Mutex::new(RefCell::new(ring))
    }

    fn run(line: &str) -> (ShellAction, std::string::String) {
        let config = Config::default();
        let ring = ring();
        let debug = AtomicBool::new(true);
        let mut shell = Shell {
            config: &config,
            ring: &ring,
            debug_on_usb: &debug,
        };
        let mut out = std::string::String::new();
        let action = shell.handle_line(line, &mut out);
        (action, out)
    }

    #[test]
    fn print_config_shows_beacon_settings() {
        let (action, out) = run("printConfig");
        assert_eq!(action, ShellAction::None);
        assert!(out.contains("DL7AD-12"));
        assert!(out.contains("WIDE1-1"));
        assert!(out.contains("cycle 120s"));
    }

    #[test]
    fn read_log_count_and_record() {
        let (_, out) = run("readLog");
        assert!(out.contains("Log records: 1"));
        let (_, out) = run("readLog 0");
        assert!(out.contains("id 7"), "{}", out);
        assert!(out.contains("vbat 4100mV"));
        let (_, out) = run("readLog 5");
        assert!(out.contains("No record at index 5"));
    }

    #[test]
    fn debug_on_usb_toggles() {
        let config = Config::default();
        let ring = ring();
        let debug = AtomicBool::new(true);
        let mut shell = Shell {
            config: &config,
            ring: &ring,
            debug_on_usb: &debug,
        };
        let mut out = std::string::String::new();
        shell.handle_line("debugOnUSB 0", &mut out);
        assert!(!debug.load(Ordering::Acquire));
        shell.handle_line("debugOnUSB 1", &mut out);
        assert!(debug.load(Ordering::Acquire));
        shell.handle_line("debugOnUSB", &mut out);
        assert!(out.contains("Argument missing"));
    }

    #[test]
    fn send_message_returns_action() {
        let (action, _) = run("send_aprs_message DK3SB-7 hello out there");
        match action {
            ShellAction::SendMessage { dest, text } => {
                assert_eq!(dest.format().as_str(), "DK3SB-7");
                assert_eq!(text.as_str(), "hello out there");
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn camera_and_rx_commands() {
        let (action, _) = run("command2Camera 0x3008 0x42");
        assert_eq!(
            action,
            ShellAction::CameraCommand {
                reg: 0x3008,
                value: 0x42
            }
        );
        let (action, _) = run("test_rx 30");
        assert_eq!(action, ShellAction::TestRx { seconds: 30 });
        let (action, _) = run("printPicture");
        assert_eq!(action, ShellAction::CapturePicture);
    }

    #[test]
    fn unknown_command_reports() {
        let (action, out) = run("frobnicate");
        assert_eq!(action, ShellAction::None);
        assert!(out.contains("Unknown command"));
    }
}
