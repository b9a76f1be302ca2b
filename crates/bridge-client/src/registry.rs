//! Invocation registry and per-request lifecycle state machine.
//!
//! The registry correlates the shared event stream back to individual
//! invocations by `req_id` and makes the one idempotent, race-free decision
//! that matters: when an invocation is finished. Once a request reaches a
//! terminal state, every further event bearing its id is discarded (logged
//! as an anomaly) and can never reopen it. Callers must serialize access;
//! the dispatcher holds the registry behind a mutex.

use std::collections::HashMap;
use std::time::Instant;

use log::warn;
use serde_json::Value;
use tokio::sync::watch;

use bridge_protocol::BridgeEvent;

// ============================================================================
// States and outcomes
// ============================================================================

/// Lifecycle state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Handle returned, no stream event seen yet.
    Pending,
    /// Server acknowledged the request.
    Acked,
    /// At least one chunk has arrived.
    Streaming,
    /// Terminal: server delivered a result.
    Completed,
    /// Terminal: cancellation confirmed.
    Cancelled,
    /// Terminal: transport lost mid-invocation.
    Failed,
    /// Terminal: no terminal event within the deadline.
    #[serde(rename = "timeout")]
    TimedOut,
}

impl InvocationState {
    /// Whether this state ends the invocation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationState::Completed
                | InvocationState::Cancelled
                | InvocationState::Failed
                | InvocationState::TimedOut
        )
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationState::Pending => "pending",
            InvocationState::Acked => "acked",
            InvocationState::Streaming => "streaming",
            InvocationState::Completed => "completed",
            InvocationState::Cancelled => "cancelled",
            InvocationState::Failed => "failed",
            InvocationState::TimedOut => "timeout",
        };
        write!(f, "{s}")
    }
}

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// Terminal payload from the server.
    Completed(Value),
    /// Cancellation confirmed by the server.
    Cancelled(Value),
    /// Ended locally without a server terminal event.
    Failed { reason: String },
    /// Client-side deadline elapsed first.
    TimedOut,
}

/// What the registry did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Event was applied to a live invocation.
    Applied { now_terminal: bool },
    /// Event arrived for an invocation already in a terminal state.
    AfterTerminal,
    /// No invocation is registered under this `req_id`.
    UnknownReqId,
    /// Event carries no `req_id` (transport-level notice).
    NotInvocationScoped,
}

// ============================================================================
// Invocation
// ============================================================================

/// Registry-owned mutable record of one invocation.
#[derive(Debug)]
pub struct Invocation {
    pub req_id: String,
    pub agent_id: String,
    pub state: InvocationState,
    pub created_at: Instant,
    pub last_event_at: Option<Instant>,
    /// Cumulative upstream loss reported by this invocation's chunks.
    pub total_dropped_bytes: u64,
    pub total_dropped_lines: u64,
    /// Terminal notification to the handle holder.
    done: watch::Sender<Option<InvocationOutcome>>,
}

impl Invocation {
    fn finish(&mut self, state: InvocationState, outcome: InvocationOutcome) {
        self.state = state;
        self.last_event_at = Some(Instant::now());
        self.done.send_replace(Some(outcome));
    }

    /// Whether any handle still observes this invocation.
    fn has_observers(&self) -> bool {
        self.done.receiver_count() > 0
    }
}

/// Awaitable terminal outcome of one invocation.
///
/// Dropping the waiter releases the observer reference; a terminal
/// invocation with no observers left is evicted from the registry.
#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    rx: watch::Receiver<Option<InvocationOutcome>>,
}

impl CompletionWaiter {
    /// Wait until the invocation reaches a terminal state.
    pub async fn wait(mut self) -> InvocationOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                // Dispatcher went away before a terminal event landed.
                return InvocationOutcome::Failed {
                    reason: "dispatcher_dropped".to_string(),
                };
            }
        }
    }

    /// Terminal outcome if already reached, without waiting.
    pub fn peek(&self) -> Option<InvocationOutcome> {
        self.rx.borrow().clone()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Map from `req_id` to invocation state, applied in wire order.
#[derive(Debug, Default)]
pub struct InvocationRegistry {
    invocations: HashMap<String, Invocation>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted invocation as `PENDING`.
    ///
    /// Returns a waiter for its terminal outcome. A `req_id` colliding with
    /// a live invocation violates the server's uniqueness guarantee; the
    /// old record is failed and replaced so the stream stays consistent.
    pub fn insert_pending(
        &mut self,
        req_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> CompletionWaiter {
        let req_id = req_id.into();
        if let Some(existing) = self.invocations.get_mut(&req_id)
            && !existing.state.is_terminal()
        {
            warn!("req_id '{req_id}' reused while non-terminal; failing stale record");
            existing.finish(
                InvocationState::Failed,
                InvocationOutcome::Failed {
                    reason: "req_id_reused".to_string(),
                },
            );
        }

        let (done, rx) = watch::channel(None);
        self.invocations.insert(
            req_id.clone(),
            Invocation {
                req_id,
                agent_id: agent_id.into(),
                state: InvocationState::Pending,
                created_at: Instant::now(),
                last_event_at: None,
                total_dropped_bytes: 0,
                total_dropped_lines: 0,
                done,
            },
        );
        CompletionWaiter { rx }
    }

    /// Apply one stream event, in the order the transport delivered it.
    pub fn apply(&mut self, event: &BridgeEvent) -> EventDisposition {
        let Some(req_id) = event.req_id() else {
            return EventDisposition::NotInvocationScoped;
        };
        let Some(inv) = self.invocations.get_mut(req_id) else {
            return EventDisposition::UnknownReqId;
        };
        if inv.state.is_terminal() {
            return EventDisposition::AfterTerminal;
        }

        inv.last_event_at = Some(Instant::now());
        match event {
            BridgeEvent::InvokeAck { .. } => {
                // Acks after the first chunk carry no new information.
                if inv.state == InvocationState::Pending {
                    inv.state = InvocationState::Acked;
                }
                EventDisposition::Applied { now_terminal: false }
            }
            BridgeEvent::Chunk { payload, .. } => {
                inv.total_dropped_bytes += payload.dropped_bytes;
                inv.total_dropped_lines += payload.dropped_lines;
                inv.state = InvocationState::Streaming;
                EventDisposition::Applied { now_terminal: false }
            }
            BridgeEvent::Result { payload, .. } => {
                inv.finish(
                    InvocationState::Completed,
                    InvocationOutcome::Completed(payload.clone()),
                );
                EventDisposition::Applied { now_terminal: true }
            }
            BridgeEvent::CancelAck { payload, .. } => {
                inv.finish(
                    InvocationState::Cancelled,
                    InvocationOutcome::Cancelled(payload.clone()),
                );
                EventDisposition::Applied { now_terminal: true }
            }
            BridgeEvent::Disconnect { .. } => EventDisposition::NotInvocationScoped,
        }
    }

    /// Apply a client-side timeout. No-op if the invocation is unknown or
    /// already terminal (a wire terminal event won the race).
    pub fn apply_timeout(&mut self, req_id: &str) -> bool {
        match self.invocations.get_mut(req_id) {
            Some(inv) if !inv.state.is_terminal() => {
                inv.finish(InvocationState::TimedOut, InvocationOutcome::TimedOut);
                true
            }
            _ => false,
        }
    }

    /// Fail every non-terminal invocation (transport lost).
    ///
    /// Returns the affected `req_id`s.
    pub fn fail_all(&mut self, reason: &str) -> Vec<String> {
        let mut failed = Vec::new();
        for inv in self.invocations.values_mut() {
            if !inv.state.is_terminal() {
                inv.finish(
                    InvocationState::Failed,
                    InvocationOutcome::Failed {
                        reason: reason.to_string(),
                    },
                );
                failed.push(inv.req_id.clone());
            }
        }
        failed
    }

    /// Look up one invocation.
    pub fn get(&self, req_id: &str) -> Option<&Invocation> {
        self.invocations.get(req_id)
    }

    /// Whether a cancel for this id would be a no-op.
    pub fn is_terminal_or_unknown(&self, req_id: &str) -> bool {
        self.invocations
            .get(req_id)
            .map(|inv| inv.state.is_terminal())
            .unwrap_or(true)
    }

    /// Evict terminal invocations no observer references anymore.
    ///
    /// Returns the number of evicted records.
    pub fn sweep(&mut self) -> usize {
        let before = self.invocations.len();
        self.invocations
            .retain(|_, inv| !inv.state.is_terminal() || inv.has_observers());
        before - self.invocations.len()
    }

    /// Number of tracked invocations.
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    /// Whether no invocations are tracked.
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}
