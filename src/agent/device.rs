//! Public device API.
//!
//! Construct once per device, register handlers, `start()`, then use the
//! `send*` methods from any thread. The background roles own the connection;
//! the application never touches the socket.
//!
//! ```no_run
//! use admlink::{Device, DeviceConfig};
//! use admlink::adapters::netif::TcpNetwork;
//! # use admlink::agent::ports::{FotaStore, SystemPort};
//! # fn wire(store: Box<dyn FotaStore>, system: Box<dyn SystemPort>) {
//! let cfg = DeviceConfig::new("DEVICE-UID", "DEVICE-TOKEN");
//! let device = Device::new(cfg, Box::new(TcpNetwork::new()), store, system);
//! device.register_rpc("echo", |args| {
//!     Ok(args.first().cloned().unwrap_or_default())
//! });
//! device.start();
//! device.send_event(serde_json::json!({"boot": true})).ok();
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::config::DeviceConfig;
use crate::error::Error;
use crate::fota::FotaCheckpoint;
use crate::proto::message;

use super::ports::{FotaStore, NetworkPort, SystemPort};
use super::session::SessionCore;

/// A device connected to the Application Device Manager.
pub struct Device {
    core: Arc<SessionCore>,
}

impl Device {
    /// Store the configuration and wire the platform ports. No I/O happens
    /// until [`start`](Self::start).
    pub fn new(
        cfg: DeviceConfig,
        network: Box<dyn NetworkPort>,
        store: Box<dyn FotaStore>,
        system: Box<dyn SystemPort>,
    ) -> Self {
        Self {
            core: Arc::new(SessionCore::new(cfg, network, store, system)),
        }
    }

    /// Register a remotely callable function. Calls arrive on the reader
    /// role; keep handlers short.
    pub fn register_rpc<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + 'static,
    {
        self.core.register_rpc(method, handler);
    }

    /// Install the FOTA veto hook, invoked at the three update checkpoints.
    pub fn set_fota_callback<F>(&self, callback: F)
    where
        F: Fn(FotaCheckpoint) -> bool + Send + 'static,
    {
        self.core.set_fota_callback(Box::new(callback));
    }

    /// Connect and log in, retrying until successful, then spawn the worker
    /// roles. Idempotent: calling again never duplicates a live role.
    pub fn start(&self) {
        self.core.start();
    }

    /// Queue a pre-shaped message for the server.
    pub fn send(&self, msg: Value) -> Result<(), Error> {
        self.core.enqueue(msg)
    }

    /// Queue an `EVNT` frame carrying `payload`.
    pub fn send_event(&self, payload: Value) -> Result<(), Error> {
        self.core.enqueue(message::event(payload))
    }

    /// Queue an `NTFY` frame for connected apps and templates.
    pub fn send_notification(&self, title: &str, text: &str) -> Result<(), Error> {
        self.core.enqueue(message::notification(title, text))
    }

    /// Whether a login handshake has completed and not been torn down since.
    pub fn logged_in(&self) -> bool {
        self.core.logged_in()
    }

    /// Effective heartbeat cadence (the server may have overridden the
    /// configured one at login).
    pub fn heartbeat_secs(&self) -> u32 {
        self.core.heartbeat_secs()
    }

    /// Last timestamp reported by the server, `Null` before the first login.
    pub fn server_timestamp(&self) -> Value {
        self.core.server_timestamp()
    }
}
