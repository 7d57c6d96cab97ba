//! Port traits — the boundary between the agent core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Session / FOTA engine (domain)
//! ```
//!
//! Driven adapters (sockets, flash, MCU identity) implement these traits.
//! The session consumes them as trait objects, so the core never touches
//! ESP-IDF directly and the whole protocol engine runs under test with mocks.

use core::fmt;
use std::sync::Arc;

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: domain → link layer)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Hostname lookup failed or produced no usable address.
    ResolveFailed,
    /// TCP connect failed.
    ConnectFailed,
    /// The stream was closed locally while an operation was pending.
    Closed,
    /// Read or write failed at the socket layer.
    Io,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolveFailed => write!(f, "hostname resolution failed"),
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::Closed => write!(f, "stream closed"),
            Self::Io => write!(f, "socket I/O error"),
        }
    }
}

/// Byte-oriented duplex session stream.
///
/// Methods take `&self`: the reader role reads, the writer role writes, and
/// the session manager may close from any thread. `close` must be idempotent
/// and must unblock a pending `read`.
pub trait SessionStream: Send + Sync {
    /// Read up to `buf.len()` bytes. `Ok(0)` means EOF.
    fn read(&self, buf: &mut [u8]) -> Result<usize, NetworkError>;

    /// Write the whole buffer.
    fn write_all(&self, data: &[u8]) -> Result<(), NetworkError>;

    /// Shut the stream down; swallows errors.
    fn close(&self);
}

/// Link bring-up: name resolution and TCP connection.
pub trait NetworkPort: Send {
    /// Resolve a hostname to a printable IP address.
    fn resolve(&mut self, host: &str) -> Result<String, NetworkError>;

    /// Open a TCP connection.
    fn connect(&mut self, ip: &str, port: u16) -> Result<Arc<dyn SessionStream>, NetworkError>;
}

// ───────────────────────────────────────────────────────────────
// FOTA store port (driven adapter: domain ↔ flash/bootloader)
// ───────────────────────────────────────────────────────────────

/// Number of words in the bootloader record.
pub const FOTA_RECORD_WORDS: usize = 9;

/// The bootloader record, word-for-word.
///
/// The word layout is an external ABI shared with the bootloader; the named
/// accessors only read the positions the agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FotaRecord(pub [u32; FOTA_RECORD_WORDS]);

impl FotaRecord {
    /// Word 0: non-zero when the running runtime has been committed.
    pub fn valid_runtime(&self) -> bool {
        self.0[0] != 0
    }

    /// Word 1: slot holding the current VM image.
    pub fn current_vm_slot(&self) -> u32 {
        self.0[1]
    }

    /// Word 4: slot holding the current bytecode image.
    pub fn current_bc_slot(&self) -> u32 {
        self.0[4]
    }

    /// Word 8: flash-dictated transfer chunk size in bytes.
    pub fn chunk_size(&self) -> u32 {
        self.0[8]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The platform has no FOTA record (FOTA unsupported).
    NoRecord,
    EraseFailed,
    WriteFailed,
    ChecksumFailed,
    CloseFailed,
    /// The bootloader rejected the tentative slot switch.
    AttemptFailed,
    AcceptFailed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => write!(f, "no FOTA record"),
            Self::EraseFailed => write!(f, "flash erase failed"),
            Self::WriteFailed => write!(f, "flash write failed"),
            Self::ChecksumFailed => write!(f, "flash checksum failed"),
            Self::CloseFailed => write!(f, "flash close failed"),
            Self::AttemptFailed => write!(f, "FOTA record update failed"),
            Self::AcceptFailed => write!(f, "FOTA accept failed"),
        }
    }
}

/// Flash slot and bootloader-commit primitives.
///
/// Slot *addresses* come from `find_*_slot`; a non-positive address is a
/// platform sentinel meaning "no erase required" and is never passed to
/// `erase_slot`.
pub trait FotaStore: Send {
    /// The bootloader record; fails when the platform does not support FOTA.
    fn get_record(&mut self) -> Result<FotaRecord, StoreError>;

    /// Physical base address of the inactive bytecode slot.
    fn find_bytecode_slot(&mut self) -> i64;

    /// Physical base address of the inactive VM slot.
    fn find_vm_slot(&mut self) -> i64;

    fn erase_slot(&mut self, addr: u32, size: u32) -> Result<(), StoreError>;

    fn write_slot(&mut self, addr: u32, data: &[u8]) -> Result<(), StoreError>;

    /// Checksum of a written slot. An empty vector means the platform does
    /// not verify and the CRC step is skipped.
    fn checksum_slot(&mut self, addr: u32, size: u32) -> Result<Vec<u8>, StoreError>;

    /// Finish writing a slot (flush caches, lock the region).
    fn close_slot(&mut self, addr: u32) -> Result<(), StoreError>;

    /// Mark the new slots tentative; the bootloader boots them once and rolls
    /// back unless `accept` confirms.
    fn attempt(&mut self, bc_slot: u32, vm_slot: u32) -> Result<(), StoreError>;

    /// Confirm the currently-running image as healthy.
    fn accept(&mut self) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// System port (driven adapter: domain → MCU identity/reset)
// ───────────────────────────────────────────────────────────────

/// MCU identity and reset.
pub trait SystemPort: Send + Sync {
    /// Identifier of the installed VM image, sent at login.
    fn vm_uid(&self) -> &str;

    /// Platform name, sent at login.
    fn platform(&self) -> &str;

    /// Reboot the MCU. Does not return on hardware; test doubles record the
    /// call and return.
    fn reset(&self);
}
