//! Client for the streaming invocation bridge.
//!
//! One [`BridgeDispatcher`] owns one shared event stream and multiplexes any
//! number of logical invocations over it, correlated by `req_id`. Invoke and
//! cancel go out over a side-channel HTTP API; everything that happens to an
//! invocation afterwards comes back as ordered stream events. The dispatcher
//! tracks per-invocation lifecycle, keeps a bounded ring of recent events for
//! display, and enforces client-side deadlines.
//!
//! ```no_run
//! use bridge_client::{BridgeConfig, BridgeDispatcher, EventFilter, InvokeOptions};
//! use serde_json::json;
//!
//! # async fn run() -> bridge_client::BridgeResult<()> {
//! let dispatcher = BridgeDispatcher::new(BridgeConfig::new("http://localhost:41830"))?;
//! dispatcher.connect().await?;
//!
//! let handle = dispatcher
//!     .invoke("agent-1", "search", json!({"q": "rust"}), InvokeOptions::default())
//!     .await?;
//! let mut events = dispatcher.subscribe(EventFilter::any().req(&handle.req_id)).await;
//! while let Some(event) = events.next().await {
//!     println!("{}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod ring;
mod transport;
pub mod view;

pub use api::{ControlApi, HttpControlApi};
pub use config::{BridgeConfig, ReconnectPolicy};
pub use dispatcher::{
    BridgeDispatcher, EventSubscription, InvocationHandle, InvokeOptions, TransportStatus,
};
pub use error::{BridgeError, BridgeResult};
pub use registry::{InvocationOutcome, InvocationState};
pub use ring::{EventFilter, EventRing};
pub use view::{LogLine, LogTone, render_log_lines};
