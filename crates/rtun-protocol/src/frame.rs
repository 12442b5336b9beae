//! Control-channel wire frames (C5, §4.5). Frames are JSON objects tagged by
//! `type`, sent as WebSocket TEXT. Size cap and transport-level heartbeat are
//! enforced by the socket layer, not here.

use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 10 MiB, per §4.5. Enforced on both sides of the socket: the edge's
/// `WebSocketUpgrade::max_message_size` and the agent's `WebSocketConfig`
/// passed to `connect_async`.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid body encoding: {0}")]
    Body(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Connected {
        subdomain: String,
        url: String,
        project_id: u64,
        project_name: String,
    },
    Error {
        message: String,
    },
    HttpRequest {
        request_id: String,
        method: String,
        path: String,
        query_string: String,
        headers: HashMap<String, String>,
        body: String,
    },
    HttpResponse {
        request_id: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
        is_binary: bool,
    },
    Ping,
    Pong,
}

impl Frame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Frame serialization is infallible")
    }

    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// 8 bytes of randomness, hex-encoded (§4.5). Collisions are a bug, not a
/// condition the table needs to handle gracefully.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Encode a response body per `is_binary`: raw UTF-8 text, or base64.
pub fn encode_body(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
            true,
        ),
    }
}

/// Inverse of `encode_body`.
pub fn decode_body(body: &str, is_binary: bool) -> Result<Vec<u8>, ProtocolError> {
    if is_binary {
        Ok(base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body)?)
    } else {
        Ok(body.as_bytes().to_vec())
    }
}
