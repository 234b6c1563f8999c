//! Image transmission thread
//!
//! Takes a JPEG from the camera, splits it into SSDV packets and sends
//! each one as a single UI frame. Packets retry individually on radio
//! errors; a failed capture skips the cycle. Continuous mode starts the
//! next image as soon as the last packet left the radio.

use crate::communication::ssdv::{SsdvImageInfo, SsdvPacketizer};
use crate::core::collector::{AppIntent, CollectorChannels};
use crate::core::watchdog::Watchdog;
use crate::devices::camera::Camera;
use crate::parameters::{ImageConf, CYCLE_CONTINUOUSLY};
use crate::subsystems::radio::{RadioManager, TxPriority};
use crate::tracker::{now_secs, originate, transmit_frame};
use embassy_time::{Duration, Timer};

pub async fn image_thread<C: Camera>(
    name: &'static str,
    conf: &ImageConf,
    camera: &mut C,
    jpeg_buf: &mut [u8],
    channels: &CollectorChannels,
    radio: &RadioManager,
    wdg: &Watchdog,
) {
    crate::log_info!("IMG  > Startup image thread {}", name);
    let Some(mut rcv) = channels.published.receiver() else {
        crate::log_error!("IMG  > No collector subscriber slot left");
        return;
    };
    let heartbeat = wdg.register(name, now_secs());

    Timer::after(Duration::from_secs(conf.thread.init_delay_s as u64)).await;

    let mut image_id: u8 = 0;
    loop {
        if let Some(hb) = heartbeat {
            wdg.beat(hb, now_secs());
        }
        let point = channels
            .request_snapshot(&mut rcv, AppIntent::empty())
            .await;

        if !conf.sleep.should_sleep(&point) {
            match camera.capture(conf.res, conf.quality, jpeg_buf) {
                Ok(len) => {
                    channels
                        .camera_error
                        .store(0, core::sync::atomic::Ordering::Release);
                    let (width, height) = conf.res.dims();
                    let info = SsdvImageInfo {
                        width,
                        height,
                        quality: conf.quality,
                    };
                    crate::log_info!("IMG  > Encode image {} ({} bytes)", image_id, len);
                    let mut packetizer =
                        SsdvPacketizer::new(conf.call.base(), image_id, info, &jpeg_buf[..len]);
                    while let Some(packet) = packetizer.next_packet() {
                        transmit_ssdv_packet(conf, radio, &packet).await;
                        if let Some(hb) = heartbeat {
                            wdg.beat(hb, now_secs());
                        }
                    }
                    image_id = image_id.wrapping_add(1);
                }
                Err(e) => {
                    channels
                        .camera_error
                        .store(1, core::sync::atomic::Ordering::Release);
                    crate::log_error!("IMG  > Camera error: {}", e);
                    let _ = e;
                }
            }
        }

        if conf.thread.cycle_s != CYCLE_CONTINUOUSLY {
            Timer::after(Duration::from_secs(conf.thread.cycle_s as u64)).await;
        }
    }
}

/// Send one SSDV packet, retrying on radio errors.
async fn transmit_ssdv_packet(conf: &ImageConf, radio: &RadioManager, packet: &[u8]) {
    for attempt in 0..=conf.retries {
        let Ok(mut frame) = originate(conf.call, &conf.path) else {
            return;
        };
        if frame.set_info(packet).is_err() {
            return;
        }
        match transmit_frame(radio, &conf.radio, frame, TxPriority::Image).await {
            Ok(()) => return,
            Err(e) => {
                crate::log_warn!("IMG  > Packet attempt {} failed: {}", attempt, e);
                let _ = e;
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
    crate::log_error!("IMG  > Packet dropped after retries");
}
