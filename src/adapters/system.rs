//! MCU identity and reset adapter.
//!
//! The VM uid is derived from the factory-burned eFuse MAC, so it is stable
//! across reboots and reflashes. On non-ESP targets the adapter answers with
//! a fixed identity and a logged no-op reset, which is enough for bench runs
//! against a local server.

use core::fmt::Write as _;

use crate::agent::ports::SystemPort;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(feature = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(feature = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

#[cfg(feature = "espidf")]
const PLATFORM: &str = "esp32";
#[cfg(not(feature = "espidf"))]
const PLATFORM: &str = "host-sim";

/// `SystemPort` backed by the ESP32 (or a host simulation).
pub struct Esp32System {
    vm_uid: heapless::String<16>,
}

impl Default for Esp32System {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32System {
    pub fn new() -> Self {
        let mac = read_mac();
        let mut vm_uid = heapless::String::new();
        let _ = write!(
            vm_uid,
            "VM-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        Self { vm_uid }
    }
}

impl SystemPort for Esp32System {
    fn vm_uid(&self) -> &str {
        &self.vm_uid
    }

    fn platform(&self) -> &str {
        PLATFORM
    }

    #[cfg(feature = "espidf")]
    fn reset(&self) {
        log::info!("restarting MCU");
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }

    #[cfg(not(feature = "espidf"))]
    fn reset(&self) {
        log::warn!("MCU reset requested (simulation — ignoring)");
    }
}
