//! End-to-end codec scenarios: frames are encoded to wire bytes, decoded
//! back and routed through the dispatcher, the way the receiver thread
//! sees them.

use stratotrack::communication::aprs::dispatcher::{Dispatcher, DispatcherConfig, HeardTable};
use stratotrack::communication::aprs::position::encode_position_and_telemetry;
use stratotrack::communication::aprs::telemetry::{encode_config, ConfigPdu};
use stratotrack::communication::aprs::AprsSymbol;
use stratotrack::communication::ax25::{Ax25Frame, Callsign};
use stratotrack::core::datapoint::{GpsState, TelemetryPoint};
use stratotrack::parameters::Config;
use stratotrack::subsystems::geofence::regional_frequency;

fn call(text: &str) -> Callsign {
    Callsign::parse(text).unwrap()
}

fn flight_point() -> TelemetryPoint {
    let mut p = TelemetryPoint::empty();
    p.id = 1;
    p.gps_state = GpsState::LockedOff;
    p.gps_lat = 377_749_000;
    p.gps_lon = -1_224_194_000;
    p.gps_alt = 1200;
    p.gps_sats = 9;
    p.adc_vbat = 4080;
    p.adc_vsol = 480;
    p
}

/// Initial beacon cycle: telemetry configuration first, then the
/// position packet, on the regional frequency, from the configured call.
#[test]
fn beacon_first_cycle_frames() {
    let config = Config::default();
    let beacon = &config.pos_pri;
    assert_eq!(beacon.call.format().as_str(), "DL7AD-12");
    assert_eq!(beacon.path.as_str(), "WIDE1-1");

    // the geofence puts the San Francisco fix on the NA frequency
    let point = flight_point();
    assert_eq!(regional_frequency(point.gps_lat, point.gps_lon), 144_390_000);

    // telemetry configuration group, then position: all survive the wire
    for kind in ConfigPdu::ALL {
        let info = encode_config(&beacon.call, kind);
        let mut frame = Ax25Frame::new(beacon.call, call("APZSTR"), &beacon.path).unwrap();
        frame.set_info(&info).unwrap();
        let decoded = Ax25Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.info_str().starts_with(":DL7AD-12 :"));
    }

    let info = encode_position_and_telemetry(&point, beacon.symbol).unwrap();
    let mut frame = Ax25Frame::new(beacon.call, call("APZSTR"), &beacon.path).unwrap();
    frame.set_info(&info).unwrap();
    let decoded = Ax25Frame::decode(&frame.encode().unwrap()).unwrap();
    assert_eq!(decoded.src, beacon.call);
    assert_eq!(decoded.path.len(), 1);
    assert!(decoded.info_str().starts_with("!3746.49N/12225.16WO"));
}

/// A frame passing through the digipeater keeps its content; only the
/// path mutates (used WIDE1-1 stays consumed, WIDE2-2 decrements).
#[test]
fn digipeat_over_the_wire() {
    let mut dc = DispatcherConfig::new(call("DL7AD-12"));
    dc.digipeat_enabled = true;
    let heard = HeardTable::new();
    let mut dispatcher = Dispatcher::new(dc, &heard);

    let mut incoming = Ax25Frame::new(call("DK3SB"), call("APRS"), "WIDE1-1*,WIDE2-2").unwrap();
    incoming.set_info(b"!4852.45N/00913.76E>ground station").unwrap();
    let wire = incoming.encode().unwrap();
    let received = Ax25Frame::decode(&wire).unwrap();

    let outcome = dispatcher.handle_frame(&received, &flight_point(), 100);
    assert_eq!(outcome.replies.len(), 1);
    let digi = &outcome.replies[0].frame;
    assert_eq!(digi.info, incoming.info);
    assert!(digi.path[0].repeated);
    assert_eq!(digi.path[1].call, call("WIDE2-1"));

    // the re-emitted frame also survives the wire
    let rewire = digi.encode().unwrap();
    assert_eq!(Ax25Frame::decode(&rewire).unwrap(), *digi);
}

/// Message ack flow with dedup: `ping{007}` gets `ack007` and a `pong`;
/// a duplicate inside the window is acked but not dispatched again.
#[test]
fn message_ack_over_the_wire() {
    let dc = DispatcherConfig::new(call("DL7AD-12"));
    let heard = HeardTable::new();
    let mut dispatcher = Dispatcher::new(dc, &heard);

    let mut incoming = Ax25Frame::new(call("DK3SB"), call("APRS"), "").unwrap();
    incoming.set_info(b":DL7AD-12 :ping{007}").unwrap();
    let received = Ax25Frame::decode(&incoming.encode().unwrap()).unwrap();

    let first = dispatcher.handle_frame(&received, &flight_point(), 50);
    assert_eq!(first.replies.len(), 2);
    assert_eq!(first.replies[0].frame.info_str(), ":DK3SB    :ack007");
    assert_eq!(first.replies[1].frame.info_str(), ":DK3SB    :pong");

    // duplicate inside the window: ack again, no second pong
    let again = dispatcher.handle_frame(&received, &flight_point(), 60);
    assert_eq!(again.replies.len(), 1);
    assert_eq!(again.replies[0].frame.info_str(), ":DK3SB    :ack007");
}

/// Corrupted wire bytes never reach the dispatcher.
#[test]
fn corrupted_frames_dropped() {
    let mut frame = Ax25Frame::new(call("DK3SB"), call("APRS"), "").unwrap();
    frame.set_info(b":DL7AD-12 :ping{001}").unwrap();
    let mut wire = frame.encode().unwrap();
    let last = wire.len() - 1;
    wire[last] ^= 0xA5;
    assert!(Ax25Frame::decode(&wire).is_err());
}
