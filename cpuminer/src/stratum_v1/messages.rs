//! Stratum v1 message types and JSON-RPC serialization.
//!
//! Every line on the wire is one JSON object. Which kind of message it is
//! follows from the fields present:
//!
//! - `method` with a non-null `id`: [`JsonRpcMessage::Request`]
//! - `method` with a null or missing `id`: [`JsonRpcMessage::Notification`]
//! - `result`/`error` with an `id`: [`JsonRpcMessage::Response`]

use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::job::{Extranonce2, Job};
use crate::types::PoolDifficulty;

/// Events emitted by the Stratum client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Subscription succeeded
    Subscribed {
        extranonce1: Vec<u8>,
        extranonce2_size: u8,
    },

    /// Worker authorized, mining can begin
    Authorized,

    /// New job from `mining.notify`
    NewJob(Job),

    /// Share difficulty from `mining.set_difficulty`
    DifficultyChanged(PoolDifficulty),

    /// Extranonce replaced by `mining.set_extranonce`
    ExtranonceChanged {
        extranonce1: Vec<u8>,
        extranonce2_size: u8,
    },

    ShareAccepted {
        job_id: String,
        nonce: u32,
        latency: Duration,
    },

    ShareRejected {
        job_id: String,
        nonce: u32,
        reason: String,
        latency: Duration,
    },

    /// Connection to the pool ended
    Disconnected,
}

/// Commands sent to the Stratum client.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    SubmitShare(SubmitParams),
}

/// Parse `mining.notify` params into a [`Job`].
///
/// `[job_id, prevhash, coinbase1, coinbase2, merkle_branches[], version,
/// nbits, ntime, clean_jobs]`
pub fn parse_notify(params: &[Value]) -> Result<Job, String> {
    if params.len() < 9 {
        return Err(format!("mining.notify needs 9 params, got {}", params.len()));
    }

    let id = params[0].as_str().ok_or("job_id not a string")?.to_string();

    let prev_hash_str = params[1].as_str().ok_or("prev_hash not a string")?;
    let prev_hash = parse_prev_hash(prev_hash_str)?;

    let coinbase1_str = params[2].as_str().ok_or("coinbase1 not a string")?;
    let coinbase1 = hex::decode(coinbase1_str).map_err(|e| format!("coinbase1 hex: {}", e))?;

    let coinbase2_str = params[3].as_str().ok_or("coinbase2 not a string")?;
    let coinbase2 = hex::decode(coinbase2_str).map_err(|e| format!("coinbase2 hex: {}", e))?;

    let branches_json = params[4].as_array().ok_or("merkle_branches not an array")?;
    let merkle_branches = branches_json
        .iter()
        .map(|branch| {
            let branch_str = branch.as_str().ok_or("merkle branch not a string")?;
            parse_hash32(branch_str, "merkle branch")
        })
        .collect::<Result<Vec<_>, String>>()?;

    let version = parse_hex_u32(&params[5], "version")?;
    let nbits = parse_hex_u32(&params[6], "nbits")?;
    let ntime = parse_hex_u32(&params[7], "ntime")?;

    let clean_jobs = params[8].as_bool().ok_or("clean_jobs not a bool")?;

    Ok(Job {
        id,
        prev_hash,
        coinbase1,
        coinbase2,
        merkle_branches,
        version,
        nbits,
        ntime,
        clean_jobs,
    })
}

/// Big-endian hex u32, as used for version, nbits and ntime.
fn parse_hex_u32(value: &Value, field: &str) -> Result<u32, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("{} not a string", field))?;
    if s.len() != 8 {
        return Err(format!("{} must be 8 hex digits, got {:?}", field, s));
    }
    u32::from_str_radix(s, 16).map_err(|e| format!("{} hex: {}", field, e))
}

fn parse_hash32(hex_str: &str, field: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_str).map_err(|e| format!("{} hex: {}", field, e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("{} wrong length: {}", field, b.len()))
}

/// Convert a Stratum prevhash to header byte order.
///
/// Stratum sends the previous block hash as eight 4-byte words with the
/// bytes of each word reversed relative to the header. Undoing that per
/// word gives the bytes exactly as they sit in the block header.
///
/// ```text
/// wire:   6b6455fd 6db962c1 01f2d4fc ...
/// header: fd55646b c162b96d fcd4f201 ...
/// ```
fn parse_prev_hash(hex_str: &str) -> Result<[u8; 32], String> {
    let mut bytes = parse_hash32(hex_str, "prev_hash")?;
    for word in bytes.chunks_exact_mut(4) {
        word.reverse();
    }
    Ok(bytes)
}

/// Parameters for submitting a share to the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitParams {
    pub username: String,
    pub job_id: String,

    /// None for work with a fixed Merkle root; sent as an empty string.
    pub extranonce2: Option<Extranonce2>,

    pub ntime: u32,
    pub nonce: u32,
}

impl SubmitParams {
    /// `[username, job_id, extranonce2, ntime, nonce]` as Stratum hex.
    pub fn to_stratum_json(&self) -> Vec<Value> {
        let extranonce2_hex = self
            .extranonce2
            .map(|en2| en2.to_string())
            .unwrap_or_default();

        vec![
            Value::String(self.username.clone()),
            Value::String(self.job_id.clone()),
            Value::String(extranonce2_hex),
            Value::String(format!("{:08x}", self.ntime)),
            Value::String(format!("{:08x}", self.nonce)),
        ]
    }
}

/// JSON-RPC message envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub enum JsonRpcMessage {
    /// Method call expecting a response
    Request {
        id: u64,
        method: String,
        params: Value,
    },

    /// Response to a request
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
    },

    /// Method call without an id
    Notification { method: String, params: Value },
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcMessage::Request { id, .. } | JsonRpcMessage::Response { id, .. } => Some(*id),
            JsonRpcMessage::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. }
            | JsonRpcMessage::Notification { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }

    pub fn params(&self) -> Option<&Value> {
        match self {
            JsonRpcMessage::Request { params, .. }
            | JsonRpcMessage::Notification { params, .. } => Some(params),
            JsonRpcMessage::Response { .. } => None,
        }
    }
}

/// Wire shape shared by all three message kinds.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl TryFrom<RawMessage> for JsonRpcMessage {
    type Error = String;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let params = raw.params.unwrap_or_else(|| Value::Array(Vec::new()));
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(JsonRpcMessage::Request { id, method, params }),
            (None, Some(method)) => Ok(JsonRpcMessage::Notification { method, params }),
            (Some(id), None) => Ok(JsonRpcMessage::Response {
                id,
                result: raw.result,
                error: raw.error,
            }),
            (None, None) => Err(format!(
                "message has neither id nor method (error: {})",
                raw.error.unwrap_or(Value::Null)
            )),
        }
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        match self {
            JsonRpcMessage::Request { id, method, params } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
            JsonRpcMessage::Response { id, result, error } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("error", error)?;
            }
            JsonRpcMessage::Notification { method, params } => {
                map.serialize_entry("id", &Value::Null)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
        }
        map.end()
    }
}
