//! Session lifecycle: login handshake, reconnect, heartbeats, send paths.

use std::time::Duration;

use serde_json::json;

use crate::mock_env::{
    MockFlash, MockStream, MockSystem, device_with, login_ack, test_config,
};

const FRAME_WAIT: Duration = Duration::from_secs(3);

#[test]
fn login_sends_canonical_envelope_and_adopts_overrides() {
    let stream = MockStream::new();
    stream.push_frame(&json!({"ts": 17, "htbm": 30}));

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(test_config(), vec![stream.clone()], &flash, &system);
    device.start();

    let envelope = stream.next_sent_frame(FRAME_WAIT).expect("login envelope");
    assert_eq!(
        envelope,
        json!({
            "uid": "U", "token": "T", "platform": "px", "vmuid": "V",
            "hearbeat": 60, "ota": true, "bc": 3, "vm": 2, "chunk": 1024
        })
    );

    assert!(device.logged_in());
    assert_eq!(device.heartbeat_secs(), 30);
    assert_eq!(device.server_timestamp(), json!(17));
    assert_eq!(flash.accepts(), 1);
}

#[test]
fn login_without_record_reports_no_ota() {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let flash = MockFlash::new();
    flash.0.lock().unwrap().record = None;
    let system = MockSystem::new();
    let device = device_with(test_config(), vec![stream.clone()], &flash, &system);
    device.start();

    let envelope = stream.next_sent_frame(FRAME_WAIT).expect("login envelope");
    assert_eq!(envelope["ota"], json!(false));
    assert!(envelope.get("bc").is_none());
    assert_eq!(flash.accepts(), 1);
}

#[test]
fn hostname_is_resolved_when_no_ip_given() {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let mut cfg = test_config();
    cfg.ip = None;
    cfg.address = "adm.example.test".to_owned();

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let net = crate::mock_env::MockNetwork::queue(vec![stream.clone()]);
    let resolved = net.resolved.clone();
    let device = admlink::Device::new(cfg, Box::new(net), Box::new(flash), Box::new(system));
    device.start();

    assert!(device.logged_in());
    assert_eq!(resolved.lock().unwrap().as_slice(), ["adm.example.test"]);
}

#[test]
fn rejected_login_is_retried_on_a_fresh_connection() {
    let first = MockStream::new();
    first.push_frame(&json!({"err": "bad token"}));
    let second = MockStream::new();
    second.push_frame(&login_ack());

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(
        test_config(),
        vec![first.clone(), second.clone()],
        &flash,
        &system,
    );

    // Blocks through one 5 s backoff, then succeeds on the second stream.
    device.start();

    assert!(device.logged_in());
    assert!(first.next_sent_frame(FRAME_WAIT).is_some());
    assert!(first.is_closed());
    assert!(second.next_sent_frame(FRAME_WAIT).is_some());
}

#[test]
fn terminate_closes_and_relogs_in() {
    let first = MockStream::new();
    first.push_frame(&login_ack());
    let second = MockStream::new();
    second.push_frame(&login_ack());

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(
        test_config(),
        vec![first.clone(), second.clone()],
        &flash,
        &system,
    );
    device.start();
    assert!(first.next_sent_frame(FRAME_WAIT).is_some());

    first.push_frame(&json!({"terminate": 1}));

    // The reader notices the shutdown and the session logs in again.
    let relogin = second.next_sent_frame(Duration::from_secs(10));
    assert!(relogin.is_some(), "expected a second login envelope");
    assert_eq!(relogin.unwrap()["uid"], json!("U"));
    assert!(first.is_closed());
    assert_eq!(flash.accepts(), 2);
}

#[test]
fn low_res_writer_emits_two_heartbeats_in_five_seconds() {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let mut cfg = test_config();
    cfg.low_res = true;
    cfg.heartbeat_secs = 2;

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(cfg, vec![stream.clone()], &flash, &system);
    device.start();

    // Discard the login envelope, then watch the quiet link.
    assert!(stream.next_sent_frame(FRAME_WAIT).is_some());
    let heartbeats = stream
        .frames_during(Duration::from_secs(5))
        .into_iter()
        .filter(|f| f["cmd"] == json!("HTBM"))
        .count();
    assert_eq!(heartbeats, 2);
}

#[test]
fn double_start_does_not_duplicate_the_heartbeat_role() {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let mut cfg = test_config();
    cfg.heartbeat_secs = 2;

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(cfg, vec![stream.clone()], &flash, &system);
    device.start();
    device.start();

    assert!(stream.next_sent_frame(FRAME_WAIT).is_some());
    let heartbeats = stream
        .frames_during(Duration::from_secs(5))
        .into_iter()
        .filter(|f| f["cmd"] == json!("HTBM"))
        .count();
    assert_eq!(heartbeats, 2, "a duplicated role would double the cadence");
}

#[test]
fn send_event_and_notification_shapes_on_the_wire() {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(test_config(), vec![stream.clone()], &flash, &system);
    device.start();
    assert!(stream.next_sent_frame(FRAME_WAIT).is_some());

    device.send_event(json!({"my_button": "pressed"})).unwrap();
    assert_eq!(
        stream.next_sent_frame(FRAME_WAIT),
        Some(json!({"cmd": "EVNT", "payload": {"my_button": "pressed"}}))
    );

    device.send_notification("BUTTON!", "PRESSED!").unwrap();
    assert_eq!(
        stream.next_sent_frame(FRAME_WAIT),
        Some(json!({"cmd": "NTFY", "payload": {"text": "PRESSED!", "title": "BUTTON!"}}))
    );
}
