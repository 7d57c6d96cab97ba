//! FOTA download state machine.
//!
//! Flow (bytecode-only): begin → N × block → CRC → commit → reset
//! Flow (bytecode + VM): begin → N × bc block → bc CRC → M × vm block
//!                        → vm CRC → commit → reset
//!
//! Driven entirely by inbound `{"cmd":"OTA",…}` frames on the reader role,
//! so no locking is needed around the transfer state. The payload
//! discriminator selects the sub-step: `chunk` starts a transfer, `bin`
//! carries one base64 block, `crc` closes an image, `ok` probes readiness.
//!
//! Every write lands at `slot_base + chunk_size * block_index`; blocks arrive
//! strictly in order because the device requests block `k+1` only after
//! writing block `k`. Any failure aborts the transfer back to `Idle` with a
//! single `{"ko":1,"reason":…}` on the wire — the session itself survives.

use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use serde_json::{Map, Value, json};

use crate::agent::ports::{FotaRecord, FotaStore, StoreError};

// ── Callback gate ─────────────────────────────────────────────

/// Checkpoints at which the user callback may veto the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FotaCheckpoint {
    /// Transfer validated, nothing erased yet.
    Start = 0,
    /// Images verified, bootloader record about to change.
    Record = 1,
    /// Record changed, MCU about to reset.
    Reset = 2,
}

/// User veto hook; return `false` to cancel the update.
pub type FotaCallback = Box<dyn Fn(FotaCheckpoint) -> bool + Send>;

/// Wraps the optional user callback; a veto aborts the transfer.
pub struct FotaGate {
    callback: Option<FotaCallback>,
}

impl FotaGate {
    pub fn new(callback: Option<FotaCallback>) -> Self {
        Self { callback }
    }

    pub fn set(&mut self, callback: FotaCallback) {
        self.callback = Some(callback);
    }

    fn check(&self, checkpoint: FotaCheckpoint) -> Result<(), FotaError> {
        match &self.callback {
            Some(cb) if !cb(checkpoint) => {
                warn!("update stopped by callback at checkpoint {checkpoint:?}");
                Err(FotaError::Veto)
            }
            _ => Ok(()),
        }
    }
}

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FotaError {
    /// The platform has no FOTA record.
    Unsupported,
    /// Declared target slot equals the currently-running slot.
    BadSlots,
    /// The user callback returned `false`.
    Veto,
    /// Checksum mismatch, or an unparseable CRC string.
    BadCrc,
    /// A VM block arrived during a bytecode-only transfer.
    BcOnly,
    /// Block tag does not match the image being received.
    BadBlockType,
    /// Readiness probe named slots other than the running ones.
    NotReady,
    /// A required field is missing or has the wrong type.
    Malformed,
    /// Block payload was not valid base64.
    BadChunkEncoding,
    /// A block would overrun the declared image size.
    Overflow,
    /// Flash or bootloader primitive failed.
    Store(StoreError),
}

impl FotaError {
    /// Reason string reported on the wire in `{"ko":1,"reason":…}`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unsupported => "OTA unsupported",
            Self::BadSlots => "Bad slots",
            Self::Veto => "stopped by callback",
            Self::BadCrc => "Bad CRC",
            Self::BcOnly => "BC only ota",
            Self::BadBlockType => "bad block type",
            Self::NotReady => "not ready",
            Self::Malformed => "malformed OTA message",
            Self::BadChunkEncoding => "bad chunk encoding",
            Self::Overflow => "image overflow",
            Self::Store(StoreError::EraseFailed) => "flash erase failed",
            Self::Store(StoreError::WriteFailed) => "flash write failed",
            Self::Store(StoreError::ChecksumFailed) => "flash checksum failed",
            Self::Store(StoreError::CloseFailed) => "flash close failed",
            Self::Store(StoreError::AttemptFailed) => "FOTA record update failed",
            Self::Store(_) => "flash error",
        }
    }
}

impl fmt::Display for FotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

// ── Transfer state ────────────────────────────────────────────

/// Which image a block or CRC belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Bytecode,
    Vm,
}

impl ImageKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Bytecode => "b",
            Self::Vm => "v",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "b" => Some(Self::Bytecode),
            "v" => Some(Self::Vm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaKind {
    OnlyBytecode,
    BytecodeAndVm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Receiving(ImageKind),
    ReceivingCrc(ImageKind),
}

/// Per-transfer bookkeeping; meaningful only while the phase is not `Idle`.
#[derive(Debug, Clone, Copy)]
struct Transfer {
    kind: OtaKind,
    chunk_size: u32,
    bc_size: u32,
    vm_size: u32,
    bc_slot: u32,
    vm_slot: u32,
    next_bc_addr: i64,
    next_vm_addr: i64,
    block_index: u32,
    bytes_written: u32,
}

impl Transfer {
    fn target(&self, kind: ImageKind) -> (i64, u32) {
        match kind {
            ImageKind::Bytecode => (self.next_bc_addr, self.bc_size),
            ImageKind::Vm => (self.next_vm_addr, self.vm_size),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

/// What the session should do after a handled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FotaStep {
    /// Send this payload as `{"cmd":"OTA","payload":…}`.
    Reply(Value),
    /// Update committed: close the session, then reset the MCU.
    Reset,
    /// Frame did not apply to the current phase; nothing to do.
    Ignored,
}

/// The transfer state machine. Owned by the reader role.
pub struct FotaEngine {
    phase: Phase,
    transfer: Option<Transfer>,
}

impl Default for FotaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FotaEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            transfer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drop any in-flight transfer (reconnect, or abort after an error).
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
        self.transfer = None;
    }

    /// Handle one inbound OTA frame.
    ///
    /// On `Err` the transfer has already been aborted to `Idle` (except for
    /// a failed readiness probe, which never owned a transfer) and the caller
    /// reports the reason on the wire exactly once.
    pub fn handle(
        &mut self,
        msg: &Map<String, Value>,
        store: &mut dyn FotaStore,
        gate: &FotaGate,
    ) -> Result<FotaStep, FotaError> {
        let result = self.dispatch(msg, store, gate);
        if let Err(e) = &result {
            if *e != FotaError::NotReady {
                self.abort();
            }
        }
        result
    }

    fn dispatch(
        &mut self,
        msg: &Map<String, Value>,
        store: &mut dyn FotaStore,
        gate: &FotaGate,
    ) -> Result<FotaStep, FotaError> {
        let record = store.get_record().map_err(|_| FotaError::Unsupported)?;

        if msg.contains_key("chunk") {
            self.begin(msg, &record, store, gate)
        } else if msg.contains_key("bin") {
            self.write_block(msg, store)
        } else if msg.contains_key("crc") {
            self.verify_crc(msg, store, gate)
        } else if msg.contains_key("ok") {
            Self::ready_probe(msg, &record)
        } else {
            Ok(FotaStep::Ignored)
        }
    }

    /// `{chunk, vmsize, bcsize, bc, vm}` — validate and open the transfer.
    fn begin(
        &mut self,
        msg: &Map<String, Value>,
        record: &FotaRecord,
        store: &mut dyn FotaStore,
        gate: &FotaGate,
    ) -> Result<FotaStep, FotaError> {
        let chunk_size = field_u32(msg, "chunk")?;
        let vm_size = field_i64(msg, "vmsize")?;
        let bc_size = field_u32(msg, "bcsize")?;
        let bc_slot = field_u32(msg, "bc")?;
        let vm_slot = field_u32(msg, "vm")?;

        let with_vm = vm_size > 0;
        if bc_slot == record.current_bc_slot()
            || (with_vm && vm_slot == record.current_vm_slot())
        {
            warn!("update targets the running slots (bc={bc_slot}, vm={vm_slot})");
            return Err(FotaError::BadSlots);
        }

        let (kind, next_bc_addr, next_vm_addr) = if with_vm {
            let vm = store.find_vm_slot();
            let bc = store.find_bytecode_slot();
            (OtaKind::BytecodeAndVm, bc, vm)
        } else {
            (OtaKind::OnlyBytecode, store.find_bytecode_slot(), -1)
        };

        gate.check(FotaCheckpoint::Start)?;

        if next_bc_addr > 0 {
            info!("erasing bytecode slot at {next_bc_addr:#x} ({bc_size} bytes)");
            store
                .erase_slot(next_bc_addr as u32, bc_size)
                .map_err(FotaError::Store)?;
        }
        if next_vm_addr > 0 {
            info!("erasing VM slot at {next_vm_addr:#x} ({vm_size} bytes)");
            store
                .erase_slot(next_vm_addr as u32, vm_size as u32)
                .map_err(FotaError::Store)?;
        }

        self.transfer = Some(Transfer {
            kind,
            chunk_size,
            bc_size,
            vm_size: if with_vm { vm_size as u32 } else { 0 },
            bc_slot,
            vm_slot,
            next_bc_addr,
            next_vm_addr,
            block_index: 0,
            bytes_written: 0,
        });
        self.phase = Phase::Receiving(ImageKind::Bytecode);
        info!("update started (chunk={chunk_size}, bc={bc_size}B, vm={vm_size}B)");
        Ok(FotaStep::Reply(json!({"b": 0, "t": "b"})))
    }

    /// `{bin, t}` — decode and flash one block, then request the next.
    fn write_block(
        &mut self,
        msg: &Map<String, Value>,
        store: &mut dyn FotaStore,
    ) -> Result<FotaStep, FotaError> {
        let Phase::Receiving(current) = self.phase else {
            return Ok(FotaStep::Ignored);
        };
        let mut transfer = self.transfer.ok_or(FotaError::Malformed)?;

        let kind = ImageKind::from_tag(field_str(msg, "t")?).ok_or(FotaError::Malformed)?;
        match (current, kind) {
            (ImageKind::Bytecode, ImageKind::Vm) => return Err(FotaError::BcOnly),
            (ImageKind::Vm, ImageKind::Bytecode) => return Err(FotaError::BadBlockType),
            _ => {}
        }

        let bytes = BASE64
            .decode(field_str(msg, "bin")?)
            .map_err(|_| FotaError::BadChunkEncoding)?;

        let (base, total) = transfer.target(kind);
        if u64::from(transfer.bytes_written) + bytes.len() as u64 > u64::from(total) {
            return Err(FotaError::Overflow);
        }

        let addr = base + i64::from(transfer.chunk_size) * i64::from(transfer.block_index);
        debug!(
            "writing block {} at {addr:#x} ({} bytes)",
            transfer.block_index,
            bytes.len()
        );
        store
            .write_slot(addr as u32, &bytes)
            .map_err(FotaError::Store)?;
        transfer.block_index += 1;
        transfer.bytes_written += bytes.len() as u32;

        let step = if transfer.bytes_written < total {
            FotaStep::Reply(json!({"b": transfer.block_index, "t": kind.tag()}))
        } else {
            self.phase = Phase::ReceivingCrc(kind);
            FotaStep::Reply(json!({"c": 0, "t": kind.tag()}))
        };
        self.transfer = Some(transfer);
        Ok(step)
    }

    /// `{crc, t}` — close the slot, verify, then chain the VM image or commit.
    fn verify_crc(
        &mut self,
        msg: &Map<String, Value>,
        store: &mut dyn FotaStore,
        gate: &FotaGate,
    ) -> Result<FotaStep, FotaError> {
        let Phase::ReceivingCrc(kind) = self.phase else {
            return Ok(FotaStep::Ignored);
        };
        let transfer = self.transfer.ok_or(FotaError::Malformed)?;

        if ImageKind::from_tag(field_str(msg, "t")?) != Some(kind) {
            return Err(FotaError::BadBlockType);
        }

        let (base, size) = transfer.target(kind);
        let checksum = store
            .checksum_slot(base as u32, size)
            .map_err(FotaError::Store)?;
        store.close_slot(base as u32).map_err(FotaError::Store)?;

        if checksum.is_empty() {
            info!("platform reports no checksum, skipping verification");
        } else {
            verify_hex_checksum(field_str(msg, "crc")?, &checksum)?;
        }

        if kind == ImageKind::Bytecode && transfer.kind == OtaKind::BytecodeAndVm {
            info!("bytecode image verified, requesting VM image");
            let mut next = transfer;
            next.block_index = 0;
            next.bytes_written = 0;
            self.transfer = Some(next);
            self.phase = Phase::Receiving(ImageKind::Vm);
            return Ok(FotaStep::Reply(json!({"b": 0, "t": "v"})));
        }

        gate.check(FotaCheckpoint::Record)?;
        store
            .attempt(transfer.bc_slot, transfer.vm_slot)
            .map_err(FotaError::Store)?;
        gate.check(FotaCheckpoint::Reset)?;

        info!("update committed, reset pending");
        self.phase = Phase::Idle;
        self.transfer = None;
        Ok(FotaStep::Reset)
    }

    /// `{ok, bc, vm}` — server probes whether the device runs the named slots.
    fn ready_probe(msg: &Map<String, Value>, record: &FotaRecord) -> Result<FotaStep, FotaError> {
        let bc = field_u32(msg, "bc")?;
        let vm = field_u32(msg, "vm")?;
        if bc == record.current_bc_slot() && vm == record.current_vm_slot() {
            Ok(FotaStep::Reply(json!({"ok": 1})))
        } else {
            Err(FotaError::NotReady)
        }
    }
}

/// Compare a flash checksum against its wire form: a hex string with two
/// characters per checksum byte, each pair an unsigned 8-bit integer.
pub fn verify_hex_checksum(hex: &str, checksum: &[u8]) -> Result<(), FotaError> {
    let hex = hex.as_bytes();
    if hex.len() < checksum.len() * 2 {
        return Err(FotaError::BadCrc);
    }
    for (i, expected) in checksum.iter().enumerate() {
        let pair = core::str::from_utf8(&hex[i * 2..i * 2 + 2]).map_err(|_| FotaError::BadCrc)?;
        let wire = u8::from_str_radix(pair, 16).map_err(|_| FotaError::BadCrc)?;
        if wire != *expected {
            warn!("checksum mismatch at byte {i}: {wire:#04x} != {expected:#04x}");
            return Err(FotaError::BadCrc);
        }
    }
    Ok(())
}

// ── Field access ─────────────────────────────────────────────

fn field_u32(msg: &Map<String, Value>, key: &str) -> Result<u32, FotaError> {
    msg.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(FotaError::Malformed)
}

fn field_i64(msg: &Map<String, Value>, key: &str) -> Result<i64, FotaError> {
    msg.get(key).and_then(Value::as_i64).ok_or(FotaError::Malformed)
}

fn field_str<'a>(msg: &'a Map<String, Value>, key: &str) -> Result<&'a str, FotaError> {
    msg.get(key).and_then(Value::as_str).ok_or(FotaError::Malformed)
}

// ── Tests ─────────────────────────────────────────────────────
