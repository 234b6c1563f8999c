//! Log transmission thread
//!
//! Walks the flash log ring with a cursor, packs records into base91 log
//! packets and transmits them. When the cursor runs off the end it wraps
//! to the oldest record and starts over.

use crate::communication::aprs::message::{encode_log_packet, LOG_RECORDS_PER_PACKET};
use crate::core::collector::{AppIntent, CollectorChannels};
use crate::core::datapoint::TelemetryPoint;
use crate::core::log_ring::SharedLogRing;
use crate::core::watchdog::Watchdog;
use crate::parameters::LogConf;
use crate::platform::FlashInterface;
use crate::subsystems::radio::{RadioManager, TxPriority};
use crate::tracker::{now_secs, originate, transmit_frame};
use embassy_time::{Duration, Timer};
use heapless::Vec;

pub async fn log_thread<F: FlashInterface>(
    conf: &LogConf,
    ring: &SharedLogRing<F>,
    channels: &CollectorChannels,
    radio: &RadioManager,
    wdg: &Watchdog,
) {
    crate::log_info!("LOG  > Startup log transmission thread");
    let Some(mut rcv) = channels.published.receiver() else {
        crate::log_error!("LOG  > No collector subscriber slot left");
        return;
    };
    let heartbeat = wdg.register("log", now_secs());

    Timer::after(Duration::from_secs(conf.thread.init_delay_s as u64)).await;

    let mut cursor: u32 = 0;
    loop {
        if let Some(hb) = heartbeat {
            wdg.beat(hb, now_secs());
        }
        let _ = channels
            .request_snapshot(&mut rcv, AppIntent::empty())
            .await;

        let mut records: Vec<TelemetryPoint, LOG_RECORDS_PER_PACKET> = Vec::new();
        ring.lock(|r| {
            let mut r = r.borrow_mut();
            if cursor >= r.len() {
                cursor = 0;
            }
            for i in 0..LOG_RECORDS_PER_PACKET as u32 {
                match r.get(cursor + i) {
                    Some(p) => {
                        let _ = records.push(p);
                    }
                    None => break,
                }
            }
        });

        if !records.is_empty() {
            cursor += records.len() as u32;
            match encode_log_packet(&records) {
                Ok(info) => {
                    if let Ok(mut frame) = originate(conf.call, &conf.path) {
                        if frame.set_info(&info).is_ok() {
                            if let Err(e) =
                                transmit_frame(radio, &conf.radio, frame, TxPriority::Beacon).await
                            {
                                crate::log_error!("LOG  > Failed to transmit log packet: {}", e);
                                let _ = e;
                            }
                        }
                    }
                }
                Err(_) => crate::log_error!("LOG  > Log packet encoding failed"),
            }
        }

        Timer::after(Duration::from_secs(conf.thread.cycle_s.max(1) as u64)).await;
    }
}
