//! Software watchdog
//!
//! Every application thread registers a heartbeat and feeds it once per
//! loop iteration. A supervisor task checks the registry and requests a
//! hardware reset when any thread stays silent past the timeout.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

pub const MAX_HEARTBEATS: usize = 8;

/// Handle returned by [`Watchdog::register`].
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatId(usize);

pub struct Watchdog {
    names: Mutex<CriticalSectionRawMutex, RefCell<heapless::Vec<&'static str, MAX_HEARTBEATS>>>,
    /// Last beat per slot, seconds since boot
    beats: [AtomicU32; MAX_HEARTBEATS],
    timeout_s: u32,
}

impl Watchdog {
    pub const fn new(timeout_s: u32) -> Self {
        Self {
            names: Mutex::new(RefCell::new(heapless::Vec::new())),
            beats: [const { AtomicU32::new(0) }; MAX_HEARTBEATS],
            timeout_s,
        }
    }

    /// Register a thread. Returns `None` when the registry is full.
    pub fn register(&self, name: &'static str, now_s: u32) -> Option<HeartbeatId> {
        self.names.lock(|names| {
            let mut names = names.borrow_mut();
            let id = names.len();
            names.push(name).ok()?;
            self.beats[id].store(now_s, Ordering::Release);
            Some(HeartbeatId(id))
        })
    }

    pub fn beat(&self, id: HeartbeatId, now_s: u32) {
        self.beats[id.0].store(now_s, Ordering::Release);
    }

    /// Name of the first thread that missed its deadline, if any.
    pub fn check(&self, now_s: u32) -> Option<&'static str> {
        self.names.lock(|names| {
            let names = names.borrow();
            for (i, name) in names.iter().enumerate() {
                let last = self.beats[i].load(Ordering::Acquire);
                if now_s.saturating_sub(last) > self.timeout_s {
                    return Some(*name);
                }
            }
            None
        })
    }
}

/// Supervisor loop: poll the registry and invoke the platform reset hook
/// when a thread misses its deadline.
pub async fn watchdog_task(wdg: &Watchdog, reset: impl Fn(&'static str)) -> ! {
    let mut ticker = embassy_time::Ticker::every(embassy_time::Duration::from_secs(10));
    loop {
        ticker.next().await;
        let now_s = embassy_time::Instant::now().as_secs() as u32;
        if let Some(name) = wdg.check(now_s) {
            crate::log_error!("WDG  > Thread {} missed heartbeat, resetting", name);
            reset(name);
        }
    }
}
