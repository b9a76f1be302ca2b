//! Wire protocol for the agent invocation bridge.
//!
//! The bridge multiplexes many logical tool invocations over one physical
//! event stream. This crate defines the pieces both sides agree on:
//! - Text framing of the shared event stream (`sse`)
//! - The typed event union delivered over it (`events`)
//! - Side-channel request/response and catalog types (`requests`)
//!
//! No transport or client state lives here; see the `bridge-client` crate.

pub mod events;
pub mod requests;
pub mod sse;

pub use events::{BridgeEvent, ChunkChannel, ChunkPayload};
pub use requests::{AgentInfo, CancelRequest, InvokeRequest, InvokeResponse, ToolInfo};
pub use sse::{FrameParser, SseFrame};
