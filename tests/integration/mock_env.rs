//! Mock platform for integration tests.
//!
//! A scripted duplex stream stands in for the ADM socket, and recording
//! fakes stand in for flash and the MCU, so the tests drive the real
//! threaded session end to end: push frames as the server, observe exactly
//! what the device writes back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use admlink::agent::ports::{
    FOTA_RECORD_WORDS, FotaRecord, FotaStore, NetworkError, NetworkPort, SessionStream,
    StoreError, SystemPort,
};
use admlink::{Device, DeviceConfig};

// ── Mock stream ───────────────────────────────────────────────

#[derive(Default)]
struct StreamState {
    /// Server → device bytes.
    inbound: VecDeque<u8>,
    /// Device → server bytes.
    outbound: Vec<u8>,
    closed: bool,
}

pub struct MockStream {
    state: Mutex<StreamState>,
    readable: Condvar,
}

#[allow(dead_code)]
impl MockStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamState::default()),
            readable: Condvar::new(),
        })
    }

    /// Server side: push one frame toward the device.
    pub fn push_frame(&self, msg: &Value) {
        let mut bytes = serde_json::to_vec(msg).unwrap();
        bytes.push(b'\n');
        let mut st = self.state.lock().unwrap();
        st.inbound.extend(bytes);
        self.readable.notify_all();
    }

    /// Server side: pop the next complete line written by the device.
    pub fn next_sent_frame(&self, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut st = self.state.lock().unwrap();
                if let Some(pos) = st.outbound.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = st.outbound.drain(..=pos).collect();
                    return serde_json::from_slice(&line[..line.len() - 1]).ok();
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Collect every frame sent during the window.
    pub fn frames_during(&self, window: Duration) -> Vec<Value> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if let Some(f) = self.next_sent_frame(left.min(Duration::from_millis(100))) {
                frames.push(f);
            }
        }
        frames
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl SessionStream for MockStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let mut st = self.state.lock().unwrap();
        loop {
            if !st.inbound.is_empty() {
                let n = buf.len().min(st.inbound.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = st.inbound.pop_front().unwrap();
                }
                return Ok(n);
            }
            if st.closed {
                return Ok(0);
            }
            st = self.readable.wait(st).unwrap();
        }
    }

    fn write_all(&self, data: &[u8]) -> Result<(), NetworkError> {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return Err(NetworkError::Closed);
        }
        st.outbound.extend_from_slice(data);
        Ok(())
    }

    fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        self.readable.notify_all();
    }
}

// ── Mock network ──────────────────────────────────────────────

pub struct MockNetwork {
    streams: VecDeque<Arc<MockStream>>,
    pub resolved: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl MockNetwork {
    pub fn queue(streams: Vec<Arc<MockStream>>) -> Self {
        Self {
            streams: streams.into(),
            resolved: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl NetworkPort for MockNetwork {
    fn resolve(&mut self, host: &str) -> Result<String, NetworkError> {
        self.resolved.lock().unwrap().push(host.to_owned());
        Ok("10.0.0.1".to_owned())
    }

    fn connect(&mut self, _ip: &str, _port: u16) -> Result<Arc<dyn SessionStream>, NetworkError> {
        match self.streams.pop_front() {
            Some(stream) => Ok(stream),
            None => Err(NetworkError::ConnectFailed),
        }
    }
}

// ── Mock flash store ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashCall {
    Erase { addr: u32, size: u32 },
    Write { addr: u32, data: Vec<u8> },
    Close { addr: u32 },
    Attempt { bc: u32, vm: u32 },
    Accept,
}

pub struct FlashState {
    pub record: Option<FotaRecord>,
    pub bc_slot_addr: i64,
    pub vm_slot_addr: i64,
    pub checksum: Vec<u8>,
    pub calls: Vec<FlashCall>,
}

/// Record with a valid runtime: vm slot 2, bc slot 3, chunk 1024.
pub fn default_record() -> FotaRecord {
    let mut words = [0u32; FOTA_RECORD_WORDS];
    words[0] = 1;
    words[1] = 2;
    words[4] = 3;
    words[8] = 1024;
    FotaRecord(words)
}

#[derive(Clone)]
pub struct MockFlash(pub Arc<Mutex<FlashState>>);

#[allow(dead_code)]
impl MockFlash {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(FlashState {
            record: Some(default_record()),
            bc_slot_addr: 0x1000,
            vm_slot_addr: 0x8000,
            checksum: Vec::new(),
            calls: Vec::new(),
        })))
    }

    pub fn calls(&self) -> Vec<FlashCall> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn accepts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, FlashCall::Accept))
            .count()
    }

    pub fn erases(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, FlashCall::Erase { .. }))
            .count()
    }

    pub fn attempts(&self) -> Vec<(u32, u32)> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                FlashCall::Attempt { bc, vm } => Some((*bc, *vm)),
                _ => None,
            })
            .collect()
    }
}

impl FotaStore for MockFlash {
    fn get_record(&mut self) -> Result<FotaRecord, StoreError> {
        self.0.lock().unwrap().record.ok_or(StoreError::NoRecord)
    }

    fn find_bytecode_slot(&mut self) -> i64 {
        self.0.lock().unwrap().bc_slot_addr
    }

    fn find_vm_slot(&mut self) -> i64 {
        self.0.lock().unwrap().vm_slot_addr
    }

    fn erase_slot(&mut self, addr: u32, size: u32) -> Result<(), StoreError> {
        let mut st = self.0.lock().unwrap();
        st.calls.push(FlashCall::Erase { addr, size });
        Ok(())
    }

    fn write_slot(&mut self, addr: u32, data: &[u8]) -> Result<(), StoreError> {
        let mut st = self.0.lock().unwrap();
        st.calls.push(FlashCall::Write {
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn checksum_slot(&mut self, _addr: u32, _size: u32) -> Result<Vec<u8>, StoreError> {
        Ok(self.0.lock().unwrap().checksum.clone())
    }

    fn close_slot(&mut self, addr: u32) -> Result<(), StoreError> {
        self.0.lock().unwrap().calls.push(FlashCall::Close { addr });
        Ok(())
    }

    fn attempt(&mut self, bc: u32, vm: u32) -> Result<(), StoreError> {
        self.0
            .lock()
            .unwrap()
            .calls
            .push(FlashCall::Attempt { bc, vm });
        Ok(())
    }

    fn accept(&mut self) -> Result<(), StoreError> {
        self.0.lock().unwrap().calls.push(FlashCall::Accept);
        Ok(())
    }
}

// ── Mock system ───────────────────────────────────────────────

#[derive(Clone)]
pub struct MockSystem {
    pub resets: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockSystem {
    pub fn new() -> Self {
        Self {
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl SystemPort for MockSystem {
    fn vm_uid(&self) -> &str {
        "V"
    }

    fn platform(&self) -> &str {
        "px"
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ───────────────────────────────────────────────────

/// Configuration the scenarios share: pre-supplied IP, short timeouts.
pub fn test_config() -> DeviceConfig {
    let mut cfg = DeviceConfig::new("U", "T");
    cfg.ip = Some("10.0.0.1".to_owned());
    cfg
}

/// A plain login acknowledgement (no heartbeat override).
pub fn login_ack() -> Value {
    json!({"ts": 17})
}

#[allow(dead_code)]
pub fn device_with(
    cfg: DeviceConfig,
    streams: Vec<Arc<MockStream>>,
    flash: &MockFlash,
    system: &MockSystem,
) -> Device {
    Device::new(
        cfg,
        Box::new(MockNetwork::queue(streams)),
        Box::new(flash.clone()),
        Box::new(system.clone()),
    )
}
