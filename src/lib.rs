//! Admlink — device agent for the cloud Application Device Manager.
//!
//! Connects an MCU to the ADM over a long-lived TCP session of
//! newline-delimited JSON, multiplexing heartbeats, application messages,
//! inbound RPC calls and firmware-over-the-air updates across three worker
//! roles. The protocol engine is pure logic over port traits; ESP-IDF
//! specifics live in `adapters` behind the `espidf` feature, so the whole
//! engine builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod agent;
pub mod config;
pub mod fota;
pub mod proto;
pub mod rpc;

mod error;

pub use crate::agent::device::Device;
pub use crate::config::DeviceConfig;
pub use crate::error::Error;
pub use crate::fota::FotaCheckpoint;
