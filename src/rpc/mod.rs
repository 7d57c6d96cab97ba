//! Remote procedure calls from the ADM.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      RPC path                          │
//! │                                                        │
//! │  reader role ──▶ classify ──▶ RpcRegistry::dispatch    │
//! │                                   │                    │
//! │                  outbound queue ◀─┘ (RETN, iff ret)    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run synchronously on the reader role, so a slow handler delays
//! everything behind it on the session — keep them short. A handler error is
//! confined to its call: it becomes a `RETN{error}` when the caller asked for
//! a reply and is otherwise just logged.

use std::collections::HashMap;

use log::{debug, warn};
use serde_json::Value;

use crate::proto::message::{self, RpcCall};

/// A remotely callable function: positional JSON arguments in, JSON out.
pub type RpcHandler = Box<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send>;

/// Method-name → handler table.
pub struct RpcRegistry {
    handlers: HashMap<String, RpcHandler>,
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a method name; replaces any previous one.
    pub fn register<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + 'static,
    {
        self.handlers.insert(method.into(), Box::new(handler));
    }

    /// Invoke the handler for a classified call.
    ///
    /// Returns the `RETN` reply to send, or `None` when the method is
    /// unregistered or the caller did not ask for a reply.
    pub fn dispatch(&self, call: &RpcCall) -> Option<Value> {
        let handler = self.handlers.get(&call.method)?;
        debug!("calling rpc method '{}'", call.method);
        match handler(&call.args) {
            Ok(res) => {
                if call.ret {
                    return Some(message::rpc_result(&call.id, res));
                }
            }
            Err(e) => {
                warn!("rpc method '{}' failed: {e}", call.method);
                if call.ret {
                    return Some(message::rpc_error(&call.id, &e.to_string()));
                }
            }
        }
        None
    }
}
