//! Side-channel request/response types.
//!
//! Invoke and cancel are ordinary request/response calls made outside the
//! shared event stream; only their effects arrive as stream events. The
//! catalog types describe the read-only agent/tool registry the client
//! queries for display and validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to run a named tool of a named agent. Submitted once; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Opaque agent identifier (valid values come from the catalog).
    pub agent_id: String,
    /// Tool name within that agent.
    pub tool_name: String,
    /// Opaque structured arguments, not interpreted by the bridge.
    pub arguments: Value,
    /// Whether output should be streamed as chunks.
    pub stream: bool,
    /// Client-side completion deadline in milliseconds.
    pub timeout_ms: u64,
}

/// Server response to an accepted invoke call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Server-assigned request id correlating all stream events.
    pub req_id: String,
}

/// Request to cancel a running invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub agent_id: String,
    pub req_id: String,
    /// Free-form reason recorded by the server (e.g. `user_cancel`).
    pub reason: String,
}

/// Catalog entry for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Catalog entry for a tool exposed by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
