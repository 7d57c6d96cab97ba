//! End-to-end FOTA scenarios over a live session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use admlink::FotaCheckpoint;

use crate::mock_env::{
    FlashCall, MockFlash, MockStream, MockSystem, device_with, login_ack, test_config,
};

const FRAME_WAIT: Duration = Duration::from_secs(3);
// The commit path sleeps one second before resetting.
const RESET_WAIT: Duration = Duration::from_secs(5);

struct FotaWorld {
    stream: Arc<MockStream>,
    flash: MockFlash,
    system: MockSystem,
    checkpoints: Arc<Mutex<Vec<FotaCheckpoint>>>,
    _device: admlink::Device,
}

/// Logged-in device with a recording FOTA callback that answers `allow`.
fn world(allow: bool) -> FotaWorld {
    let stream = MockStream::new();
    stream.push_frame(&login_ack());

    let flash = MockFlash::new();
    let system = MockSystem::new();
    let device = device_with(test_config(), vec![stream.clone()], &flash, &system);

    let checkpoints = Arc::new(Mutex::new(Vec::new()));
    let seen = checkpoints.clone();
    device.set_fota_callback(move |cp| {
        seen.lock().unwrap().push(cp);
        allow
    });

    device.start();
    assert!(stream.next_sent_frame(FRAME_WAIT).is_some(), "login envelope");

    FotaWorld {
        stream,
        flash,
        system,
        checkpoints,
        _device: device,
    }
}

fn ota(payload: serde_json::Value) -> serde_json::Value {
    json!({"cmd": "OTA", "payload": payload})
}

#[test]
fn bytecode_only_update_commits_and_resets() {
    let w = world(true);
    w.flash.0.lock().unwrap().checksum = vec![0xAA, 0xBB];

    // chunk 4, two blocks of a 6-byte image, slots distinct from the running ones
    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 6, "bc": 7, "vm": 9}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"b": 0, "t": "b"})))
    );

    w.stream
        .push_frame(&json!({"cmd": "OTA", "bin": BASE64.encode(b"ABCD"), "t": "b"}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"b": 1, "t": "b"})))
    );

    w.stream
        .push_frame(&json!({"cmd": "OTA", "bin": BASE64.encode(b"EF"), "t": "b"}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"c": 0, "t": "b"})))
    );

    w.stream.push_frame(&json!({"cmd": "OTA", "crc": "aabb", "t": "b"}));

    // Commit: attempt with the declared slots, socket closed, MCU reset.
    let deadline = std::time::Instant::now() + RESET_WAIT;
    while w.system.reset_count() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(w.system.reset_count(), 1);
    assert!(w.stream.is_closed());
    assert_eq!(w.flash.attempts(), vec![(7, 9)]);

    let calls = w.flash.calls();
    assert!(calls.contains(&FlashCall::Erase { addr: 0x1000, size: 6 }));
    assert!(calls.contains(&FlashCall::Write { addr: 0x1000, data: b"ABCD".to_vec() }));
    assert!(calls.contains(&FlashCall::Write { addr: 0x1004, data: b"EF".to_vec() }));
    assert!(calls.contains(&FlashCall::Close { addr: 0x1000 }));

    assert_eq!(
        w.checkpoints.lock().unwrap().as_slice(),
        [
            FotaCheckpoint::Start,
            FotaCheckpoint::Record,
            FotaCheckpoint::Reset
        ]
    );
}

#[test]
fn callback_veto_at_start_aborts_before_any_erase() {
    let w = world(false);

    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 6, "bc": 7, "vm": 9}));

    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ko": 1, "reason": "stopped by callback"})))
    );
    assert_eq!(w.flash.erases(), 0);
    assert_eq!(w.system.reset_count(), 0);
    assert_eq!(
        w.checkpoints.lock().unwrap().as_slice(),
        [FotaCheckpoint::Start]
    );
}

#[test]
fn update_targeting_running_slot_is_rejected() {
    let w = world(true);

    // bc slot 3 is the running one.
    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 6, "bc": 3, "vm": 9}));

    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ko": 1, "reason": "Bad slots"})))
    );
    assert_eq!(w.flash.erases(), 0);
    assert!(w.checkpoints.lock().unwrap().is_empty());
}

#[test]
fn abort_returns_to_idle_and_a_new_update_can_start() {
    let w = world(true);

    // First update dies on a checksum mismatch...
    w.flash.0.lock().unwrap().checksum = vec![0x11];
    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 2, "bc": 7, "vm": 9}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"b": 0, "t": "b"})))
    );
    w.stream
        .push_frame(&json!({"cmd": "OTA", "bin": BASE64.encode(b"AB"), "t": "b"}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"c": 0, "t": "b"})))
    );
    w.stream.push_frame(&json!({"cmd": "OTA", "crc": "99", "t": "b"}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ko": 1, "reason": "Bad CRC"})))
    );
    assert!(w.flash.attempts().is_empty());

    // ...and the session is still alive for a fresh one.
    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 2, "bc": 7, "vm": 9}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"b": 0, "t": "b"})))
    );
}

#[test]
fn readiness_probe_answers_for_the_running_slots() {
    let w = world(true);

    w.stream.push_frame(&json!({"cmd": "OTA", "ok": 1, "bc": 3, "vm": 2}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ok": 1})))
    );

    w.stream.push_frame(&json!({"cmd": "OTA", "ok": 1, "bc": 4, "vm": 2}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ko": 1, "reason": "not ready"})))
    );
}

#[test]
fn unsupported_platform_reports_ko() {
    let w = world(true);
    w.flash.0.lock().unwrap().record = None;

    w.stream
        .push_frame(&json!({"cmd": "OTA", "chunk": 4, "vmsize": 0, "bcsize": 6, "bc": 7, "vm": 9}));
    assert_eq!(
        w.stream.next_sent_frame(FRAME_WAIT),
        Some(ota(json!({"ko": 1, "reason": "OTA unsupported"})))
    );
}
