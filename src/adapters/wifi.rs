//! WiFi station-mode bring-up for the demo binary.
//!
//! The agent itself treats the link as given — it only sees the
//! `NetworkPort`. This module is the minimal STA path the demo binary needs:
//! one-time stack init, then a blocking connect with credential validation.
//! Only compiled with the `espidf` feature.

use core::fmt;
use std::time::{Duration, Instant};

use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    /// SSID must be 1-32 printable ASCII bytes.
    InvalidSsid,
    /// Password must be 8-64 bytes for WPA2, or empty for open networks.
    InvalidPassword,
    InitFailed,
    ConnectFailed,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(
                f,
                "password invalid (must be 8-64 bytes for WPA2, or empty for open)"
            ),
            Self::InitFailed => write!(f, "WiFi stack init failed"),
            Self::ConnectFailed => write!(f, "WiFi connection failed"),
        }
    }
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate(ssid: &str, password: &str) -> Result<(), WifiError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(WifiError::InvalidSsid);
    }
    if !password.is_empty() && (password.len() < 8 || password.len() > 64) {
        return Err(WifiError::InvalidPassword);
    }
    Ok(())
}

/// One-time WiFi stack initialization. Call from `main()` before
/// [`connect`].
pub fn stack_init() -> Result<(), WifiError> {
    use esp_idf_svc::sys::*;
    unsafe {
        let ret = esp_netif_init();
        if ret != ESP_OK as i32 {
            error!("esp_netif_init failed ({ret})");
            return Err(WifiError::InitFailed);
        }

        let ret = esp_event_loop_create_default();
        if ret != ESP_OK as i32 && ret != ESP_ERR_INVALID_STATE as i32 {
            error!("esp_event_loop_create_default failed ({ret})");
            return Err(WifiError::InitFailed);
        }

        esp_netif_create_default_wifi_sta();

        let init_cfg = wifi_init_config_t {
            ..Default::default()
        };
        let ret = esp_wifi_init(&init_cfg);
        if ret != ESP_OK as i32 {
            error!("esp_wifi_init failed ({ret})");
            return Err(WifiError::InitFailed);
        }

        let ret = esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA);
        if ret != ESP_OK as i32 {
            error!("esp_wifi_set_mode failed ({ret})");
            return Err(WifiError::InitFailed);
        }

        let ret = esp_wifi_start();
        if ret != ESP_OK as i32 {
            error!("esp_wifi_start failed ({ret})");
            return Err(WifiError::InitFailed);
        }
    }
    info!("WiFi stack initialized (STA mode)");
    Ok(())
}

/// Connect to an access point and block until the link is up (or `timeout`
/// expires).
pub fn connect(ssid: &str, password: &str, timeout: Duration) -> Result<(), WifiError> {
    validate(ssid, password)?;

    use esp_idf_svc::sys::*;
    unsafe {
        let mut wifi_cfg: wifi_config_t = core::mem::zeroed();
        let sta = &mut wifi_cfg.__bindgen_anon_1.sta;

        sta.ssid[..ssid.len()].copy_from_slice(ssid.as_bytes());
        sta.password[..password.len()].copy_from_slice(password.as_bytes());
        sta.threshold.authmode = if password.is_empty() {
            wifi_auth_mode_t_WIFI_AUTH_OPEN
        } else {
            wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK
        };

        let ret = esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut wifi_cfg);
        if ret != ESP_OK as i32 {
            error!("esp_wifi_set_config failed ({ret})");
            return Err(WifiError::ConnectFailed);
        }

        let ret = esp_wifi_connect();
        if ret != ESP_OK as i32 {
            error!("esp_wifi_connect failed ({ret})");
            return Err(WifiError::ConnectFailed);
        }
    }

    info!("connecting to '{ssid}'");
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if link_up() {
            info!("WiFi connected");
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(250));
    }
    Err(WifiError::ConnectFailed)
}

fn link_up() -> bool {
    use esp_idf_svc::sys::*;
    unsafe {
        let mut ap_info: wifi_ap_record_t = core::mem::zeroed();
        esp_wifi_sta_get_ap_info(&mut ap_info) == ESP_OK as i32
    }
}
