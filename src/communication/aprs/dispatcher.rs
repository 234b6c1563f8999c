//! Incoming frame dispatcher
//!
//! Every decoded UI frame lands here. The dispatcher keeps the
//! heard-direct station set, acknowledges and deduplicates messages
//! addressed to us, evaluates remote commands and produces digipeat
//! copies when enabled. It owns all of its state and runs only inside
//! the receiver thread.

use crate::communication::aprs::decode::{decode_info, AprsPdu, MessageKind};
use crate::communication::aprs::message::{encode_ack, encode_aprsd, encode_message, encode_rej};
use crate::communication::ax25::{Ax25Frame, Callsign};
use crate::core::datapoint::TelemetryPoint;
use crate::subsystems::radio::TxPriority;
use core::cell::RefCell;
use core::fmt::Write;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::index_map::FnvIndexMap;
use heapless::{Deque, String, Vec};

/// Destination "tocall" of frames this tracker originates (experimental
/// APRS device prefix).
pub const APRS_TOCALL: &str = "APZSTR";

/// Heard-direct set capacity.
const HEARD_CAPACITY: usize = 16;

/// Message dedup history depth.
const DEDUP_CAPACITY: usize = 8;

/// Dispatcher policy, derived from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub own_call: Callsign,
    /// Digi path for originated replies
    pub reply_path: String<16>,
    /// Heard-direct entries expire after this many seconds
    pub aprsd_window_s: u32,
    /// Duplicate message numbers inside this window are not re-dispatched
    pub dedup_window_s: u32,
    pub digipeat_enabled: bool,
}

impl DispatcherConfig {
    pub fn new(own_call: Callsign) -> Self {
        Self {
            own_call,
            reply_path: String::new(),
            aprsd_window_s: 600,
            dedup_window_s: 30,
            digipeat_enabled: false,
        }
    }
}

/// One frame to transmit in response to an incoming one.
#[derive(Debug, Clone)]
pub struct Reply {
    pub frame: Ax25Frame,
    pub priority: TxPriority,
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub replies: Vec<Reply, 4>,
    /// A REBOOT command was received and acknowledged
    pub reboot: bool,
}

/// Remote commands accepted over APRS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Aprsd,
    Aprst,
    Ping,
    Reboot,
    Unsupported,
}

fn parse_command(text: &str) -> Command {
    let t = text.trim();
    if t.eq_ignore_ascii_case("aprsd") {
        Command::Aprsd
    } else if t.eq_ignore_ascii_case("aprst") || t.eq_ignore_ascii_case("aprs?") {
        Command::Aprst
    } else if t.eq_ignore_ascii_case("ping") {
        Command::Ping
    } else if t.eq_ignore_ascii_case("reboot") {
        Command::Reboot
    } else {
        Command::Unsupported
    }
}

/// Directly heard stations with last-heard timestamps. Mutated only by
/// the dispatcher; the beacon thread reads a snapshot for its unsolicited
/// APRSD summary.
pub struct HeardTable {
    inner: Mutex<CriticalSectionRawMutex, RefCell<FnvIndexMap<Callsign, u32, HEARD_CAPACITY>>>,
}

impl HeardTable {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(FnvIndexMap::new())),
        }
    }

    fn note(&self, call: Callsign, now_s: u32) {
        self.inner.lock(|map| {
            let mut map = map.borrow_mut();
            if map.insert(call, now_s).is_err() {
                // full: drop the stalest entry
                if let Some(oldest) = map.iter().min_by_key(|(_, &t)| t).map(|(c, _)| *c) {
                    map.remove(&oldest);
                    let _ = map.insert(call, now_s);
                }
            }
        });
    }

    fn evict(&self, now_s: u32, window_s: u32) {
        self.inner.lock(|map| {
            let mut map = map.borrow_mut();
            while let Some(call) = map
                .iter()
                .find(|(_, &t)| now_s.saturating_sub(t) > window_s)
                .map(|(c, _)| *c)
            {
                map.remove(&call);
            }
        });
    }

    /// Calls currently inside the window, for APRSD responses.
    pub fn snapshot(&self) -> Vec<Callsign, HEARD_CAPACITY> {
        self.inner.lock(|map| {
            let mut out = Vec::new();
            for call in map.borrow().keys() {
                let _ = out.push(*call);
            }
            out
        })
    }
}

impl Default for HeardTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Dispatcher<'a> {
    config: DispatcherConfig,
    heard: &'a HeardTable,
    /// Recently served message numbers per sender
    recent: Deque<(Callsign, String<5>, u32), DEDUP_CAPACITY>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: DispatcherConfig, heard: &'a HeardTable) -> Self {
        Self {
            config,
            heard,
            recent: Deque::new(),
        }
    }

    /// Route one incoming frame. `latest` backs the APRST reply.
    pub fn handle_frame(
        &mut self,
        frame: &Ax25Frame,
        latest: &TelemetryPoint,
        now_s: u32,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        self.heard.evict(now_s, self.config.aprsd_window_s);

        // a frame that arrived without any used digi slot was heard direct
        if !frame.path.iter().any(|e| e.repeated) {
            self.heard.note(frame.src, now_s);
        }

        match decode_info(&frame.info) {
            AprsPdu::Message(msg) if msg.addressee == self.config.own_call => {
                self.handle_message(frame.src, &msg.text, msg.kind, &msg.number, latest, now_s, &mut outcome);
            }
            _ => {
                if self.config.digipeat_enabled {
                    if let Some(digi) = self.digipeat(frame) {
                        let _ = outcome.replies.push(Reply {
                            frame: digi,
                            priority: TxPriority::Digipeat,
                        });
                    }
                }
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_message(
        &mut self,
        src: Callsign,
        text: &str,
        kind: MessageKind,
        number: &Option<String<5>>,
        latest: &TelemetryPoint,
        now_s: u32,
        outcome: &mut DispatchOutcome,
    ) {
        match kind {
            MessageKind::Ack | MessageKind::Rej => {
                crate::log_debug!("dispatcher: reply from {}", src.format().as_str());
                return;
            }
            MessageKind::Text => {}
        }

        let duplicate = number
            .as_ref()
            .map(|n| self.is_duplicate(src, n, now_s))
            .unwrap_or(false);

        let command = parse_command(text);
        if let Some(n) = number {
            let reply = if command == Command::Unsupported {
                encode_rej(&src, n)
            } else {
                encode_ack(&src, n)
            };
            self.push_reply(outcome, &reply, TxPriority::IncomingAck);
            if !duplicate {
                self.remember(src, n, now_s);
            }
        }
        if duplicate {
            return;
        }

        match command {
            Command::Aprsd => {
                let heard = self.heard.snapshot();
                let info = encode_aprsd(&src, heard.iter());
                self.push_reply(outcome, &info, TxPriority::Beacon);
            }
            Command::Aprst => {
                let mut text: String<32> = String::new();
                let tod = latest.gps_time % 86_400;
                let _ = write!(
                    text,
                    "Last fix {:02}:{:02}:{:02}z",
                    tod / 3600,
                    tod % 3600 / 60,
                    tod % 60
                );
                if let Ok(info) = encode_message(&src, &text, None) {
                    self.push_reply(outcome, &info, TxPriority::Beacon);
                }
            }
            Command::Ping => {
                if let Ok(info) = encode_message(&src, "pong", None) {
                    self.push_reply(outcome, &info, TxPriority::Beacon);
                }
            }
            Command::Reboot => {
                outcome.reboot = true;
            }
            Command::Unsupported => {}
        }
    }

    fn push_reply(&self, outcome: &mut DispatchOutcome, info: &[u8], priority: TxPriority) {
        let dest = match Callsign::parse(APRS_TOCALL) {
            Ok(c) => c,
            Err(_) => return,
        };
        let Ok(mut frame) = Ax25Frame::new(self.config.own_call, dest, &self.config.reply_path)
        else {
            return;
        };
        if frame.set_info(info).is_ok() {
            let _ = outcome.replies.push(Reply {
                frame,
                priority,
            });
        }
    }

    fn is_duplicate(&self, src: Callsign, number: &str, now_s: u32) -> bool {
        self.recent.iter().any(|(c, n, t)| {
            *c == src
                && n.as_str() == number
                && now_s.saturating_sub(*t) <= self.config.dedup_window_s
        })
    }

    fn remember(&mut self, src: Callsign, number: &str, now_s: u32) {
        let mut entry: String<5> = String::new();
        let _ = entry.push_str(number);
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        let _ = self.recent.push_back((src, entry, now_s));
    }

    /// WIDEn-N digipeating: the first unused path slot is consumed.
    /// Matching our own call sets the H-bit; a WIDEn-N alias is
    /// decremented and exhausted (H-bit) when N reaches zero.
    fn digipeat(&self, frame: &Ax25Frame) -> Option<Ax25Frame> {
        let idx = frame.path.iter().position(|e| !e.repeated)?;
        let elem = frame.path[idx];
        let mut out = frame.clone();
        if elem.call == self.config.own_call {
            out.path[idx].repeated = true;
        } else if elem.call.base().starts_with("WIDE") && elem.call.ssid() > 0 {
            let n = elem.call.ssid() - 1;
            out.path[idx].call = elem.call.with_ssid(n);
            if n == 0 {
                out.path[idx].repeated = true;
            }
        } else {
            return None;
        }
        Some(out)
    }
}
