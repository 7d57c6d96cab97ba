//! Bounded outbound message queue.
//!
//! Capacity is tiny: a stalled link pushes backpressure onto `send*` callers
//! within one enqueue deadline instead of buffering arbitrarily on a
//! RAM-constrained MCU. Multi-producer (application thread,
//! reader role posting RPC/FOTA replies, heartbeat role), single consumer
//! (writer role).

use core::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use serde_json::Value;

/// Messages the queue will hold before refusing more.
pub const QUEUE_CAPACITY: usize = 2;

/// How long an enqueue may wait on a full queue before failing.
pub const ENQUEUE_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue stayed full past [`ENQUEUE_DEADLINE`].
    Full,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
        }
    }
}

/// The session's outbound queue. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        Self { tx, rx }
    }

    /// Enqueue a message, waiting up to [`ENQUEUE_DEADLINE`] for room.
    pub fn enqueue(&self, msg: Value) -> Result<(), QueueError> {
        self.tx
            .send_timeout(msg, ENQUEUE_DEADLINE)
            .map_err(|_| QueueError::Full)
    }

    /// Dequeue the next message, waiting up to `timeout`. `None` on timeout.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Value> {
        self.rx.recv_timeout(timeout).ok()
    }
}
