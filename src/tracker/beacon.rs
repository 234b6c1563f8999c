//! Position beacon thread
//!
//! Every cycle: request a snapshot with GPS, transmit the telemetry
//! configuration group when due (four PDUs, 5 s apart), then the
//! position + telemetry packet, then the APRSD heard-direct summary
//! addressed to the base station or to ourselves.
//!
//! The configuration group always precedes the first position packet of
//! a boot, so receivers can rescale the analog channels.

use crate::communication::aprs::dispatcher::HeardTable;
use crate::communication::aprs::message::encode_aprsd;
use crate::communication::aprs::position::encode_position_and_telemetry;
use crate::communication::aprs::telemetry::{encode_config, ConfigPdu};
use crate::core::collector::{AppIntent, CollectorChannels};
use crate::core::watchdog::Watchdog;
use crate::parameters::{BaseConf, BeaconConf, CYCLE_CONTINUOUSLY};
use crate::subsystems::radio::{RadioManager, TxPriority};
use crate::tracker::{now_secs, originate, transmit_frame};
use embassy_time::{Duration, Instant, Timer};

/// Pause between consecutive beacon transmissions.
const INTER_PACKET_GAP: Duration = Duration::from_secs(5);

/// Wait before retrying when no position is available yet.
const NO_POSITION_WAIT: Duration = Duration::from_secs(60);

pub async fn beacon_thread(
    name: &'static str,
    conf: &BeaconConf,
    base: &BaseConf,
    channels: &CollectorChannels,
    radio: &RadioManager,
    heard: &HeardTable,
    wdg: &Watchdog,
) {
    crate::log_info!("BCN  > Startup beacon thread {}", name);
    let Some(mut rcv) = channels.published.receiver() else {
        crate::log_error!("BCN  > No collector subscriber slot left");
        return;
    };
    let heartbeat = wdg.register(name, now_secs());

    Timer::after(Duration::from_secs(conf.thread.init_delay_s as u64)).await;

    // None forces a configuration transmission on the first cycle
    let mut last_conf_tx: Option<Instant> = None;

    loop {
        let cycle_start = Instant::now();
        if let Some(hb) = heartbeat {
            wdg.beat(hb, now_secs());
        }
        crate::log_info!("BCN  > Do module BEACON cycle for {}", conf.call.format().as_str());

        let point = channels
            .request_snapshot(&mut rcv, AppIntent::REQUIRES_GPS)
            .await;

        if !conf.sleep.should_sleep(&point) {
            if !point.position_valid() {
                crate::log_info!(
                    "BCN  > Waiting for position data ({} sats)",
                    point.gps_sats
                );
                Timer::after(NO_POSITION_WAIT).await;
                continue;
            }

            let conf_due = match last_conf_tx {
                None => conf.tel_enc_cycle_s != 0,
                Some(at) => {
                    conf.tel_enc_cycle_s != 0
                        && at.elapsed() >= Duration::from_secs(conf.tel_enc_cycle_s as u64)
                }
            };
            if conf_due {
                crate::log_info!("BCN  > Transmit telemetry configuration");
                for kind in ConfigPdu::ALL {
                    let info = encode_config(&conf.call, kind);
                    if let Ok(mut frame) = originate(conf.call, &conf.path) {
                        if frame.set_info(&info).is_ok() {
                            if let Err(e) =
                                transmit_frame(radio, &conf.radio, frame, TxPriority::Beacon).await
                            {
                                crate::log_error!("BCN  > Failed to transmit telemetry config: {}", e);
                                let _ = e;
                            }
                        }
                    }
                    Timer::after(INTER_PACKET_GAP).await;
                }
                last_conf_tx = Some(Instant::now());
            }

            crate::log_info!("BCN  > Transmit position and telemetry");
            match encode_position_and_telemetry(&point, conf.symbol) {
                Ok(info) => {
                    if let Ok(mut frame) = originate(conf.call, &conf.path) {
                        if frame.set_info(&info).is_ok() {
                            if let Err(e) =
                                transmit_frame(radio, &conf.radio, frame, TxPriority::Beacon).await
                            {
                                crate::log_error!("BCN  > Failed to transmit beacon data: {}", e);
                                let _ = e;
                            }
                        }
                    }
                }
                Err(_) => crate::log_error!("BCN  > Position encoding failed"),
            }
            Timer::after(INTER_PACKET_GAP).await;

            // Unsolicited heard-direct summary, addressed to the base
            // station when one is configured
            crate::log_info!("BCN  > Transmit recently heard direct");
            let (dest, path) = if base.enabled {
                (base.call, base.path.as_str())
            } else {
                (conf.call, conf.path.as_str())
            };
            let calls = heard.snapshot();
            let info = encode_aprsd(&dest, calls.iter());
            if let Ok(mut frame) = originate(conf.call, path) {
                if frame.set_info(&info).is_ok() {
                    if let Err(e) =
                        transmit_frame(radio, &conf.radio, frame, TxPriority::Beacon).await
                    {
                        crate::log_error!("BCN  > Failed to transmit APRSD data: {}", e);
                        let _ = e;
                    }
                }
            }
        }

        if conf.run_once {
            return;
        }
        if conf.thread.cycle_s != CYCLE_CONTINUOUSLY {
            let cycle = Duration::from_secs(conf.thread.cycle_s as u64);
            let elapsed = cycle_start.elapsed();
            if elapsed < cycle {
                Timer::after(cycle - elapsed).await;
            }
        }
    }
}
