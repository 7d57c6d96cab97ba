//! Admlink demo — connect a device to the ADM and answer RPC calls.
//!
//! Bring up WiFi, construct the device with the ESP32 adapters, register a
//! sample RPC method and a FOTA checkpoint logger, then report uptime events
//! while the background roles keep the session alive (and apply firmware
//! updates pushed from the ADM).
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde_json::json;

use admlink::adapters::fota_flash::EspFotaStore;
use admlink::adapters::netif::TcpNetwork;
use admlink::adapters::system::Esp32System;
use admlink::adapters::wifi;
use admlink::{Device, DeviceConfig};

// Copy these from the ADM device panel.
const DEVICE_UID: &str = "DEVICE-UID-HERE";
const DEVICE_TOKEN: &str = "DEVICE-TOKEN-HERE";

const WIFI_SSID: &str = "NETWORK-SSID";
const WIFI_PASSWORD: &str = "NETWORK-PASSWORD";

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("admlink v{} starting", env!("CARGO_PKG_VERSION"));

    wifi::stack_init().map_err(|e| anyhow!("{e}"))?;
    let mut linked = false;
    for attempt in 1..=5 {
        match wifi::connect(WIFI_SSID, WIFI_PASSWORD, Duration::from_secs(15)) {
            Ok(()) => {
                linked = true;
                break;
            }
            Err(e) => warn!("link attempt {attempt} failed: {e}"),
        }
    }
    if !linked {
        return Err(anyhow!("could not join '{WIFI_SSID}'"));
    }

    let mut cfg = DeviceConfig::new(DEVICE_UID, DEVICE_TOKEN);
    cfg.log = true;
    let device = Device::new(
        cfg,
        Box::new(TcpNetwork::new()),
        Box::new(EspFotaStore::new()),
        Box::new(Esp32System::new()),
    );

    device.register_rpc("uptime", |_args| Ok(json!(uptime_secs())));
    device.register_rpc("add", |args| {
        let a = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
        let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(json!(a + b))
    });

    device.set_fota_callback(|checkpoint| {
        info!("fota checkpoint {checkpoint:?}");
        true
    });

    // Blocks until the first login succeeds, then the workers take over.
    device.start();
    info!(
        "session up (heartbeat {}s, server ts {})",
        device.heartbeat_secs(),
        device.server_timestamp()
    );

    loop {
        std::thread::sleep(Duration::from_secs(60));
        if let Err(e) = device.send_event(json!({"uptime": uptime_secs()})) {
            warn!("event dropped: {e}");
        }
    }
}

fn uptime_secs() -> u64 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000_000
}
