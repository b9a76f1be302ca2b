//! Typed events delivered over the shared bridge stream.
//!
//! Every logical invocation shares one physical event channel; events are
//! correlated back to their invocation by `req_id`. The union is tagged by
//! the wire `type` field, which matches the frame's `event:` name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sse::SseFrame;

/// Output channel of a streamed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkChannel {
    #[default]
    Stdout,
    Stderr,
}

impl std::fmt::Display for ChunkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkChannel::Stdout => write!(f, "stdout"),
            ChunkChannel::Stderr => write!(f, "stderr"),
        }
    }
}

/// Payload of a `CHUNK` event.
///
/// `dropped_bytes`/`dropped_lines` report loss that already happened
/// upstream of the client (producer-side backpressure). The data they
/// describe was never delivered and cannot be recovered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Which output channel the data belongs to.
    #[serde(default)]
    pub channel: ChunkChannel,
    /// The streamed text.
    #[serde(default)]
    pub data: String,
    /// Bytes discarded upstream before this chunk.
    #[serde(default)]
    pub dropped_bytes: u64,
    /// Lines discarded upstream before this chunk.
    #[serde(default)]
    pub dropped_lines: u64,
}

/// One event off the shared bridge stream.
///
/// `ts` is epoch milliseconds. `DISCONNECT` is a transport-level notice and
/// carries no `req_id`; the client also synthesizes it locally when the
/// stream fails unexpectedly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEvent {
    /// Server accepted an invocation request.
    InvokeAck {
        req_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        ts: i64,
        #[serde(default)]
        payload: Value,
    },

    /// A unit of streamed output belonging to one invocation.
    Chunk {
        req_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        ts: i64,
        // A chunk without a payload object is an empty stdout chunk, not a
        // malformed frame.
        #[serde(default)]
        payload: ChunkPayload,
    },

    /// Terminal payload of a completed invocation.
    Result {
        req_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        ts: i64,
        #[serde(default)]
        payload: Value,
    },

    /// Server confirms a cancellation took effect.
    CancelAck {
        req_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        ts: i64,
        #[serde(default)]
        payload: Value,
    },

    /// Transport-level notice, not tied to one invocation.
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        ts: i64,
        #[serde(default)]
        payload: Value,
    },
}

impl BridgeEvent {
    /// Wire name of the event type (`CHUNK`, `RESULT`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::InvokeAck { .. } => "INVOKE_ACK",
            BridgeEvent::Chunk { .. } => "CHUNK",
            BridgeEvent::Result { .. } => "RESULT",
            BridgeEvent::CancelAck { .. } => "CANCEL_ACK",
            BridgeEvent::Disconnect { .. } => "DISCONNECT",
        }
    }

    /// Request id this event belongs to, if invocation-scoped.
    pub fn req_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::InvokeAck { req_id, .. }
            | BridgeEvent::Chunk { req_id, .. }
            | BridgeEvent::Result { req_id, .. }
            | BridgeEvent::CancelAck { req_id, .. } => Some(req_id),
            BridgeEvent::Disconnect { .. } => None,
        }
    }

    /// Agent id the event was emitted for, if the server attached one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::InvokeAck { agent_id, .. }
            | BridgeEvent::Chunk { agent_id, .. }
            | BridgeEvent::Result { agent_id, .. }
            | BridgeEvent::CancelAck { agent_id, .. }
            | BridgeEvent::Disconnect { agent_id, .. } => agent_id.as_deref(),
        }
    }

    /// Event timestamp in epoch milliseconds.
    pub fn ts(&self) -> i64 {
        match self {
            BridgeEvent::InvokeAck { ts, .. }
            | BridgeEvent::Chunk { ts, .. }
            | BridgeEvent::Result { ts, .. }
            | BridgeEvent::CancelAck { ts, .. }
            | BridgeEvent::Disconnect { ts, .. } => *ts,
        }
    }

    /// Whether the event ends an invocation (`RESULT` or `CANCEL_ACK`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeEvent::Result { .. } | BridgeEvent::CancelAck { .. }
        )
    }

    /// Decode a parsed frame into a typed event.
    ///
    /// The frame's `event:` name is authoritative for the type; the data
    /// text must be a JSON object carrying the envelope fields. Returns
    /// `None` for unknown types or malformed payloads — the caller logs
    /// and drops those, they never terminate the stream.
    pub fn from_frame(frame: &SseFrame) -> Option<BridgeEvent> {
        let mut value: Value = serde_json::from_str(&frame.data).ok()?;
        let obj = value.as_object_mut()?;
        obj.insert("type".to_string(), Value::String(frame.event.clone()));
        serde_json::from_value(value).ok()
    }
}
