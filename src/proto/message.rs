//! Message shapes for the ADM session.
//!
//! Outbound frames are built here so every worker serializes the exact same
//! shapes; inbound frames are classified lazily — unknown keys are accepted
//! and unknown frames fall through to [`Inbound::Other`].

use serde_json::{Map, Value, json};

use crate::agent::ports::FotaRecord;

// ── Outbound constructors ────────────────────────────────────

/// `{"cmd":"HTBM"}` keepalive.
pub fn heartbeat() -> Value {
    json!({"cmd": "HTBM"})
}

/// `{"cmd":"EVNT","payload":…}` application event.
pub fn event(payload: Value) -> Value {
    json!({"cmd": "EVNT", "payload": payload})
}

/// `{"cmd":"NTFY","payload":{"text":…,"title":…}}` push notification.
pub fn notification(title: &str, text: &str) -> Value {
    json!({"cmd": "NTFY", "payload": {"text": text, "title": title}})
}

/// `{"cmd":"RETN","id":…,"res":…}` RPC result.
pub fn rpc_result(id: &Value, res: Value) -> Value {
    json!({"cmd": "RETN", "id": id, "res": res})
}

/// `{"cmd":"RETN","id":…,"error":…}` RPC failure.
pub fn rpc_error(id: &Value, error: &str) -> Value {
    json!({"cmd": "RETN", "id": id, "error": error})
}

/// `{"cmd":"OTA","payload":…}` FOTA sub-protocol frame.
pub fn ota(payload: Value) -> Value {
    json!({"cmd": "OTA", "payload": payload})
}

/// Login envelope, the first frame on a fresh connection.
///
/// `record` is the bootloader record when FOTA is supported; slot/chunk
/// fields are attached only for a valid runtime. The `"hearbeat"` key keeps
/// the canonical wire spelling — the server does not recognise the corrected
/// form.
pub fn login_envelope(
    uid: &str,
    token: &str,
    platform: &str,
    vm_uid: &str,
    heartbeat_secs: u32,
    record: Option<&FotaRecord>,
) -> Value {
    let mut msg = json!({
        "uid": uid,
        "token": token,
        "platform": platform,
        "vmuid": vm_uid,
        "hearbeat": heartbeat_secs,
        "ota": record.is_some(),
    });
    if let (Some(rec), Some(obj)) = (record, msg.as_object_mut()) {
        if rec.valid_runtime() {
            obj.insert("bc".into(), json!(rec.current_bc_slot()));
            obj.insert("vm".into(), json!(rec.current_vm_slot()));
            obj.insert("chunk".into(), json!(rec.chunk_size()));
        }
    }
    msg
}

// ── Inbound classification ───────────────────────────────────

/// A well-formed `{"cmd":"CALL",…}` request.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub id: Value,
    pub args: Vec<Value>,
    /// Whether the caller wants a `RETN` reply.
    pub ret: bool,
}

/// Classified inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    Call(RpcCall),
    /// FOTA sub-protocol frame; the payload discriminator is resolved by the
    /// state machine.
    Ota(Map<String, Value>),
    Terminate,
    /// Anything unrecognised; ignored by the session.
    Other(Value),
}

/// Classify one decoded frame.
pub fn classify(msg: Value) -> Inbound {
    let Some(obj) = msg.as_object() else {
        return Inbound::Other(msg);
    };

    let cmd = obj.get("cmd").and_then(Value::as_str);

    if cmd == Some("CALL") {
        if let (Some(method), Some(id)) = (obj.get("method").and_then(Value::as_str), obj.get("id"))
        {
            return Inbound::Call(RpcCall {
                method: method.to_owned(),
                id: id.clone(),
                args: obj
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                ret: obj.get("ret").and_then(Value::as_bool).unwrap_or(false),
            });
        }
        return Inbound::Other(msg);
    }

    if obj.contains_key("terminate") {
        return Inbound::Terminate;
    }

    if cmd == Some("OTA") {
        return match msg {
            Value::Object(map) => Inbound::Ota(map),
            other => Inbound::Other(other),
        };
    }

    Inbound::Other(msg)
}

// ── Tests ────────────────────────────────────────────────────
