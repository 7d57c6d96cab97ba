//! Top-level error funnel for the agent.
//!
//! Subsystems keep their own small error enums next to their code; this type
//! is what the public [`Device`](crate::agent::device::Device) API returns.
//! Session faults (transport, framing) trigger a reconnect internally and are
//! only surfaced here from the login path.

use core::fmt;

use crate::agent::ports::NetworkError;
use crate::agent::queue::QueueError;
use crate::fota::FotaError;
use crate::proto::codec::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Framing or JSON decode failure on the session stream.
    Frame(FrameError),
    /// Resolve/connect/read/write failure from the network port.
    Network(NetworkError),
    /// The bounded outbound queue stayed full past the enqueue deadline.
    QueueFull,
    /// The server answered the login envelope with an `"err"` field.
    LoginRejected,
    /// No connection is currently established.
    NotConnected,
    /// A FOTA transfer was aborted.
    Fota(FotaError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Network(e) => write!(f, "network: {e}"),
            Self::QueueFull => write!(f, "outbound queue full"),
            Self::LoginRejected => write!(f, "login rejected by server"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Fota(e) => write!(f, "fota: {e}"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

impl From<QueueError> for Error {
    fn from(_: QueueError) -> Self {
        Self::QueueFull
    }
}

impl From<FotaError> for Error {
    fn from(e: FotaError) -> Self {
        Self::Fota(e)
    }
}
