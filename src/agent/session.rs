//! Session manager — owns the connection and the worker roles.
//!
//! ```text
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │  SessionCore (Arc-shared)                                   │
//!  │                                                             │
//!  │  ┌──────────┐   ┌──────────────┐   ┌───────────────────┐  │
//!  │  │ Reader   │   │ Writer       │   │ Heartbeat         │  │
//!  │  │ classify │   │ queue drain  │   │ periodic HTBM     │  │
//!  │  │ RPC/FOTA │   │              │   │ (low-res: merged  │  │
//!  │  │          │   │              │   │  into the writer) │  │
//!  │  └──────────┘   └──────────────┘   └───────────────────┘  │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any I/O failure on any role triggers a single-flight reconnect: the first
//! role to notice sets the `reconnecting` flag, closes the socket and re-runs
//! the login loop; every other role parks in one-second sleeps until the flag
//! clears. There is no thread cancellation — the flag is the only signal the
//! workers observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{Map, Value, json};

use crate::config::DeviceConfig;
use crate::error::Error;
use crate::fota::{FotaEngine, FotaGate, FotaStep};
use crate::proto::codec::{self, FrameError, LineDecoder};
use crate::proto::message::{self, Inbound};
use crate::rpc::RpcRegistry;

use super::ports::{FotaStore, NetworkPort, SessionStream, SystemPort};
use super::queue::OutboundQueue;

const READ_BUF_SIZE: usize = 1024;

/// Delay between failed login attempts.
const LOGIN_BACKOFF: Duration = Duration::from_secs(5);

/// Poll interval for workers parked behind the reconnect flag, and for the
/// writer's bounded dequeue so it can observe the flag.
const PARK_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period between committing an update and resetting the MCU.
const RESET_DELAY: Duration = Duration::from_secs(1);

/// Ignore mutex poisoning: a panicked worker must not wedge the others.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── State ─────────────────────────────────────────────────────

struct LinkState {
    /// Resolved once, cached for the lifetime of the device.
    ip: Option<String>,
    /// Effective heartbeat cadence; the server may override at login.
    heartbeat_secs: u32,
    /// Last server-reported timestamp, opaque to the device.
    server_ts: Value,
    logged_in: bool,
}

#[derive(Default)]
struct WorkerSet {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

fn role_alive(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

fn spawn_role(name: &str, f: impl FnOnce() + Send + 'static) -> Option<JoinHandle<()>> {
    match thread::Builder::new().name(name.into()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("failed to spawn {name}: {e}");
            None
        }
    }
}

// ── Session core ──────────────────────────────────────────────

pub(crate) struct SessionCore {
    pub(crate) cfg: DeviceConfig,
    rpc: Mutex<RpcRegistry>,
    gate: Mutex<FotaGate>,
    net: Mutex<Box<dyn NetworkPort>>,
    store: Mutex<Box<dyn FotaStore>>,
    system: Box<dyn SystemPort>,
    conn: Mutex<Option<Arc<dyn SessionStream>>>,
    outbound: OutboundQueue,
    link: Mutex<LinkState>,
    /// Single-flight reconnect guard; doubles as the park signal for workers.
    reconnecting: AtomicBool,
    /// Serializes every write to the socket.
    write_gate: Mutex<()>,
    workers: Mutex<WorkerSet>,
}

impl SessionCore {
    pub(crate) fn new(
        cfg: DeviceConfig,
        net: Box<dyn NetworkPort>,
        store: Box<dyn FotaStore>,
        system: Box<dyn SystemPort>,
    ) -> Self {
        let link = LinkState {
            ip: cfg.ip.clone(),
            heartbeat_secs: cfg.heartbeat_secs,
            server_ts: Value::Null,
            logged_in: false,
        };
        Self {
            cfg,
            rpc: Mutex::new(RpcRegistry::new()),
            gate: Mutex::new(FotaGate::new(None)),
            net: Mutex::new(net),
            store: Mutex::new(store),
            system,
            conn: Mutex::new(None),
            outbound: OutboundQueue::new(),
            link: Mutex::new(link),
            reconnecting: AtomicBool::new(false),
            write_gate: Mutex::new(()),
            workers: Mutex::new(WorkerSet::default()),
        }
    }

    // ── Registration (before start) ───────────────────────────

    pub(crate) fn register_rpc<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + 'static,
    {
        lock(&self.rpc).register(method, handler);
    }

    pub(crate) fn set_fota_callback(
        &self,
        callback: Box<dyn Fn(crate::fota::FotaCheckpoint) -> bool + Send>,
    ) {
        lock(&self.gate).set(callback);
    }

    // ── Accessors ─────────────────────────────────────────────

    pub(crate) fn logged_in(&self) -> bool {
        lock(&self.link).logged_in
    }

    pub(crate) fn heartbeat_secs(&self) -> u32 {
        lock(&self.link).heartbeat_secs
    }

    pub(crate) fn server_timestamp(&self) -> Value {
        lock(&self.link).server_ts.clone()
    }

    pub(crate) fn enqueue(&self, msg: Value) -> Result<(), Error> {
        self.outbound.enqueue(msg)?;
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Block until logged in, then make sure every configured role is alive.
    /// Idempotent: an established session is left alone and live roles are
    /// never respawned.
    pub(crate) fn start(self: &Arc<Self>) {
        while !self.logged_in() {
            match self.login() {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        "login failed: {e}; retrying in {}s",
                        LOGIN_BACKOFF.as_secs()
                    );
                    thread::sleep(LOGIN_BACKOFF);
                }
            }
        }
        self.spawn_workers();
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Single-flight: only the first caller tears down and re-logins; anyone
    /// else returns immediately and parks in its own loop.
    fn reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("connection lost, reconnecting");
        if let Some(conn) = lock(&self.conn).take() {
            conn.close();
        }
        lock(&self.link).logged_in = false;
        self.start();
    }

    /// Close the current stream without forgetting it; the reader notices the
    /// EOF on its next read and drives the reconnect from there.
    fn shutdown_stream(&self) {
        if let Some(conn) = lock(&self.conn).as_ref() {
            conn.close();
        }
    }

    fn current_conn(&self) -> Option<Arc<dyn SessionStream>> {
        lock(&self.conn).clone()
    }

    fn park_while_reconnecting(&self) {
        while self.reconnecting.load(Ordering::SeqCst) {
            thread::sleep(PARK_INTERVAL);
        }
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut workers = lock(&self.workers);

        if !role_alive(&workers.reader) {
            let core = Arc::clone(self);
            workers.reader = spawn_role("adm-read", move || core.read_loop());
        }

        if self.cfg.low_res {
            // One combined worker: saves a task stack on small platforms.
            if !role_alive(&workers.writer) {
                let core = Arc::clone(self);
                workers.writer = spawn_role("adm-wh", move || core.write_heartbeat_loop());
            }
        } else {
            if !role_alive(&workers.writer) {
                let core = Arc::clone(self);
                workers.writer = spawn_role("adm-write", move || core.write_loop());
            }
            if !role_alive(&workers.heartbeat) {
                let core = Arc::clone(self);
                workers.heartbeat = spawn_role("adm-htbm", move || core.heartbeat_loop());
            }
        }
    }

    // ── Login ─────────────────────────────────────────────────

    fn resolved_ip(&self) -> Result<String, Error> {
        if let Some(ip) = lock(&self.link).ip.clone() {
            return Ok(ip);
        }
        let ip = lock(&self.net).resolve(&self.cfg.address)?;
        info!("resolved {} to {}", self.cfg.address, ip);
        lock(&self.link).ip = Some(ip.clone());
        Ok(ip)
    }

    fn login(&self) -> Result<(), Error> {
        let ip = self.resolved_ip()?;
        info!("connecting to {}:{} as {}", ip, self.cfg.port, self.cfg.uid);
        let stream = lock(&self.net).connect(&ip, self.cfg.port)?;
        match self.handshake(stream.as_ref()) {
            Ok(()) => {
                *lock(&self.conn) = Some(stream);
                Ok(())
            }
            Err(e) => {
                stream.close();
                Err(e)
            }
        }
    }

    fn handshake(&self, stream: &dyn SessionStream) -> Result<(), Error> {
        let record = lock(&self.store).get_record().ok();
        let heartbeat = lock(&self.link).heartbeat_secs;
        let envelope = message::login_envelope(
            &self.cfg.uid,
            &self.cfg.token,
            self.system.platform(),
            self.system.vm_uid(),
            heartbeat,
            record.as_ref(),
        );
        if self.cfg.log {
            debug!("login {envelope}");
        }
        stream.write_all(&codec::encode_line(&envelope)?)?;

        let reply = read_one_frame(stream)?;
        let Some(obj) = reply.as_object() else {
            return Err(FrameError::BadFrame.into());
        };
        if obj.contains_key("err") {
            warn!("login rejected: {reply}");
            return Err(Error::LoginRejected);
        }

        {
            let mut link = lock(&self.link);
            if let Some(ts) = obj.get("ts") {
                link.server_ts = ts.clone();
            }
            if let Some(period) = obj.get("htbm").and_then(Value::as_u64) {
                info!("server set heartbeat to {period}s");
                link.heartbeat_secs = period as u32;
            }
            link.logged_in = true;
        }

        // Confirm the running image to the bootloader; best-effort.
        if let Err(e) = lock(&self.store).accept() {
            debug!("fota accept skipped: {e}");
        }
        info!("logged in");
        Ok(())
    }

    // ── Outbound path ─────────────────────────────────────────

    /// Serialize and write one frame. The write gate keeps concurrent roles
    /// (writer, low-res heartbeat, commit path) from interleaving bytes.
    fn send_frame(&self, msg: &Value) -> Result<(), Error> {
        let conn = self.current_conn().ok_or(Error::NotConnected)?;
        let bytes = codec::encode_line(msg)?;
        let _sender = lock(&self.write_gate);
        if self.cfg.log {
            debug!("send {msg}");
        }
        conn.write_all(&bytes)?;
        Ok(())
    }

    // ── Worker roles ──────────────────────────────────────────

    fn read_loop(self: Arc<Self>) {
        let mut decoder = LineDecoder::new();
        let mut engine = FotaEngine::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            self.park_while_reconnecting();
            let Some(conn) = self.current_conn() else {
                thread::sleep(PARK_INTERVAL);
                continue;
            };
            if let Err(e) = self.read_once(conn.as_ref(), &mut decoder, &mut engine, &mut buf) {
                warn!("reader: {e}");
                decoder.reset();
                engine.abort();
                self.reconnect();
            }
        }
    }

    fn read_once(
        &self,
        conn: &dyn SessionStream,
        decoder: &mut LineDecoder,
        engine: &mut FotaEngine,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let n = conn.read(buf)?;
        if n == 0 {
            return Err(FrameError::Closed.into());
        }
        decoder.push(&buf[..n])?;
        while let Some(msg) = decoder.next_frame()? {
            self.dispatch_frame(msg, engine)?;
        }
        Ok(())
    }

    fn dispatch_frame(&self, msg: Value, engine: &mut FotaEngine) -> Result<(), Error> {
        if self.cfg.log {
            debug!("recv {msg}");
        }
        match message::classify(msg) {
            Inbound::Call(call) => {
                let reply = lock(&self.rpc).dispatch(&call);
                if let Some(reply) = reply {
                    self.outbound.enqueue(reply)?;
                }
            }
            Inbound::Terminate => {
                info!("server requested termination");
                self.shutdown_stream();
            }
            Inbound::Ota(payload) => self.handle_ota(&payload, engine)?,
            Inbound::Other(other) => {
                if self.cfg.log {
                    debug!("ignoring frame {other}");
                }
            }
        }
        Ok(())
    }

    fn handle_ota(
        &self,
        payload: &Map<String, Value>,
        engine: &mut FotaEngine,
    ) -> Result<(), Error> {
        let step = {
            let mut store = lock(&self.store);
            let gate = lock(&self.gate);
            engine.handle(payload, &mut **store, &gate)
        };
        match step {
            Ok(FotaStep::Reply(reply)) => self.outbound.enqueue(message::ota(reply))?,
            Ok(FotaStep::Reset) => {
                self.shutdown_stream();
                info!("resetting...");
                thread::sleep(RESET_DELAY);
                self.system.reset();
            }
            Ok(FotaStep::Ignored) => {}
            Err(e) => {
                warn!("update aborted: {e}");
                self.outbound
                    .enqueue(message::ota(json!({"ko": 1, "reason": e.reason()})))?;
            }
        }
        Ok(())
    }

    fn write_loop(self: Arc<Self>) {
        loop {
            self.park_while_reconnecting();
            let Some(msg) = self.outbound.dequeue_timeout(PARK_INTERVAL) else {
                continue;
            };
            if let Err(e) = self.send_frame(&msg) {
                warn!("writer: {e}");
                self.reconnect();
            }
        }
    }

    fn heartbeat_loop(self: Arc<Self>) {
        loop {
            self.park_while_reconnecting();
            let period = self.heartbeat_secs();
            thread::sleep(Duration::from_secs(period.into()));
            if let Err(e) = self.enqueue(message::heartbeat()) {
                warn!("heartbeat: {e}");
                self.reconnect();
            }
        }
    }

    /// Low-res mode: the writer doubles as the heartbeat source. Waiting on
    /// the queue is bounded by the time remaining until the next heartbeat;
    /// running out of time sends the heartbeat and restarts the countdown.
    fn write_heartbeat_loop(self: Arc<Self>) {
        let mut last_heartbeat = Instant::now();
        loop {
            self.park_while_reconnecting();
            let period = Duration::from_secs(self.heartbeat_secs().into());
            let elapsed = last_heartbeat.elapsed();

            let sent = if elapsed >= period {
                last_heartbeat = Instant::now();
                self.send_frame(&message::heartbeat())
            } else {
                match self.outbound.dequeue_timeout(period - elapsed) {
                    Some(msg) => self.send_frame(&msg),
                    None => {
                        last_heartbeat = Instant::now();
                        self.send_frame(&message::heartbeat())
                    }
                }
            };
            if let Err(e) = sent {
                warn!("writer+heartbeat: {e}");
                self.reconnect();
            }
        }
    }
}

/// Read until one complete frame arrives (login reply). Byte-at-a-time so a
/// frame the server pipelines right behind the reply stays on the stream for
/// the reader role.
fn read_one_frame(stream: &dyn SessionStream) -> Result<Value, Error> {
    let mut decoder = LineDecoder::new();
    let mut byte = [0u8; 1];
    loop {
        if let Some(msg) = decoder.next_frame()? {
            return Ok(msg);
        }
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(FrameError::Closed.into());
        }
        decoder.push(&byte[..n])?;
    }
}
