//! The agent core: ports, outbound queue, session manager, public device API.

pub mod device;
pub mod ports;
pub mod queue;

pub(crate) mod session;
