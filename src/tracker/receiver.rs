//! Receiver / digipeater thread
//!
//! Consumes demodulated frames from the radio manager, decodes them,
//! feeds the dispatcher and transmits whatever it produces (acks,
//! command replies, digipeat copies). A REBOOT command is forwarded to
//! the platform layer through a signal.

use crate::communication::aprs::dispatcher::{Dispatcher, DispatcherConfig, HeardTable};
use crate::communication::ax25::Ax25Frame;
use crate::core::datapoint::TelemetryPoint;
use crate::parameters::{Config, RxConf};
use crate::subsystems::band::clamp_to_plan;
use crate::subsystems::geofence::resolve_regional;
use crate::subsystems::radio::{Frequency, RadioManager};
use crate::tracker::{now_secs, transmit_frame};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Build the dispatcher policy out of the configuration tree. Commands
/// are accepted on the primary position call.
pub fn dispatcher_config(config: &Config) -> DispatcherConfig {
    let mut dc = DispatcherConfig::new(config.pos_pri.call);
    dc.reply_path = config.pos_pri.path.clone();
    dc.aprsd_window_s = config.aprsd_window_s;
    dc.dedup_window_s = config.dedup_window_s;
    dc.digipeat_enabled = config.dig_active;
    dc
}

pub async fn receiver_thread(
    conf: &RxConf,
    dispatcher_conf: DispatcherConfig,
    radio: &RadioManager,
    heard: &HeardTable,
    latest: impl Fn() -> TelemetryPoint,
    reboot_request: &Signal<CriticalSectionRawMutex, ()>,
) {
    crate::log_info!("RX   > Startup receiver thread");
    let rx_hz = match conf.radio.freq {
        Frequency::Static(hz) => clamp_to_plan(hz),
        Frequency::AprsRegional => resolve_regional(None),
    };
    radio.set_rx_frequency(rx_hz);

    let mut dispatcher = Dispatcher::new(dispatcher_conf, heard);
    loop {
        let rx = radio.next_rx().await;
        let frame = match Ax25Frame::decode(&rx.data) {
            Ok(frame) => frame,
            Err(e) => {
                crate::log_debug!("RX   > Dropped frame: {}", e);
                let _ = e;
                continue;
            }
        };
        crate::log_info!(
            "RX   > Frame from {} ({} dBm)",
            frame.src.format().as_str(),
            crate::devices::transceiver::rssi_to_dbm(rx.rssi)
        );

        let outcome = dispatcher.handle_frame(&frame, &latest(), now_secs());
        for reply in outcome.replies {
            if let Err(e) = transmit_frame(radio, &conf.radio, reply.frame, reply.priority).await {
                crate::log_warn!("RX   > Reply transmission failed: {}", e);
                let _ = e;
            }
        }
        if outcome.reboot {
            crate::log_warn!("RX   > Reboot requested over APRS");
            reboot_request.signal(());
        }
    }
}
