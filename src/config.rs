//! Device configuration parameters
//!
//! Everything needed to reach the Application Device Manager. Values are
//! immutable once the device is constructed; RPC handlers and the FOTA
//! callback are closures and registered on the `Device` directly.

use serde::{Deserialize, Serialize};

/// Default ADM endpoint.
pub const DEFAULT_ADDRESS: &str = "things.zerynth.com";
/// Default ADM TCP port.
pub const DEFAULT_PORT: u16 = 12345;
/// Default heartbeat cadence requested at login (the server may override it).
pub const DEFAULT_HEARTBEAT_SECS: u32 = 60;

/// Core device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Credentials ---
    /// Device UID issued by the ADM.
    pub uid: String,
    /// Pre-shared device token issued by the ADM.
    pub token: String,

    // --- Endpoint ---
    /// Pre-resolved server address, for network drivers without DNS.
    pub ip: Option<String>,
    /// Server TCP port.
    pub port: u16,
    /// Server hostname, resolved once at first login.
    pub address: String,

    // --- Session ---
    /// Seconds between heartbeat frames requested at login.
    pub heartbeat_secs: u32,
    /// Verbose frame-level logging on the serial console.
    pub log: bool,
    /// Coalesce the writer and heartbeat roles into one worker; saves one
    /// task stack on RAM-tight platforms.
    pub low_res: bool,
}

impl DeviceConfig {
    /// Configuration with library defaults for everything but the credentials.
    pub fn new(uid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            token: token.into(),
            ip: None,
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS.into(),
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            log: false,
            low_res: false,
        }
    }
}
