//! TCP network adapter over `std::net`.
//!
//! Works unchanged on ESP-IDF (lwIP backs `std::net` there) and on the host,
//! which is how the agent gets exercised end-to-end against a real socket in
//! tests. DNS goes through `ToSocketAddrs`; on ESP-IDF that is the resolver
//! configured by the network interface.

use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use log::warn;

use crate::agent::ports::{NetworkError, NetworkPort, SessionStream};

/// Plain TCP `NetworkPort`.
pub struct TcpNetwork;

impl Default for TcpNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl NetworkPort for TcpNetwork {
    fn resolve(&mut self, host: &str) -> Result<String, NetworkError> {
        let addrs: Vec<_> = (host, 0u16)
            .to_socket_addrs()
            .map_err(|e| {
                warn!("lookup for {host} failed: {e}");
                NetworkError::ResolveFailed
            })?
            .collect();
        // Prefer IPv4: the ADM endpoints are v4 and lwIP is commonly v4-only.
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| a.ip().to_string())
            .ok_or(NetworkError::ResolveFailed)
    }

    fn connect(&mut self, ip: &str, port: u16) -> Result<Arc<dyn SessionStream>, NetworkError> {
        let addr: IpAddr = ip.parse().map_err(|_| NetworkError::ConnectFailed)?;
        let stream = TcpStream::connect((addr, port)).map_err(|e| {
            warn!("connect to {ip}:{port} failed: {e}");
            NetworkError::ConnectFailed
        })?;
        // Frames are small; don't let Nagle sit on heartbeats.
        let _ = stream.set_nodelay(true);
        Ok(Arc::new(TcpSessionStream { inner: stream }))
    }
}

/// `&TcpStream` implements `Read`/`Write`, which is what lets the reader and
/// writer roles share one stream through `&self` methods.
struct TcpSessionStream {
    inner: TcpStream,
}

impl SessionStream for TcpSessionStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        (&self.inner).read(buf).map_err(|e| {
            warn!("socket read failed: {e}");
            NetworkError::Io
        })
    }

    fn write_all(&self, data: &[u8]) -> Result<(), NetworkError> {
        (&self.inner).write_all(data).map_err(|e| {
            warn!("socket write failed: {e}");
            NetworkError::Io
        })
    }

    fn close(&self) {
        // Also unblocks a reader parked in read().
        let _ = self.inner.shutdown(Shutdown::Both);
    }
}
