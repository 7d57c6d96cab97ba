//! Wire protocol: newline-delimited JSON framing and message shapes.

pub mod codec;
pub mod message;
