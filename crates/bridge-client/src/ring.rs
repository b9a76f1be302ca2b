//! Bounded ring of recently received bridge events.
//!
//! This is an operational/display log, not a durable record: once full, the
//! oldest event is evicted on each insertion and is unrecoverable by design.

use std::collections::VecDeque;

use bridge_protocol::BridgeEvent;

/// Predicate over events by agent and/or request id.
///
/// An event whose field is unset (e.g. `DISCONNECT` has no `req_id`) matches
/// regardless of the corresponding constraint.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent_id: Option<String>,
    pub req_id: Option<String>,
}

impl EventFilter {
    /// Match everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Constrain to one agent.
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Constrain to one invocation.
    pub fn req(mut self, req_id: impl Into<String>) -> Self {
        self.req_id = Some(req_id.into());
        self
    }

    /// Whether the event passes the filter.
    pub fn matches(&self, event: &BridgeEvent) -> bool {
        if let (Some(want), Some(got)) = (self.agent_id.as_deref(), event.agent_id())
            && want != got
        {
            return false;
        }
        if let (Some(want), Some(got)) = (self.req_id.as_deref(), event.req_id())
            && want != got
        {
            return false;
        }
        true
    }
}

/// Fixed-capacity FIFO of the most recent events across all invocations.
#[derive(Debug)]
pub struct EventRing {
    buf: VecDeque<BridgeEvent>,
    capacity: usize,
}

impl EventRing {
    /// Create a ring holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest if the ring is full.
    pub fn push(&mut self, event: BridgeEvent) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(event);
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the ring holds no events.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop all retained events.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// All retained events, oldest first.
    pub fn snapshot(&self) -> Vec<BridgeEvent> {
        self.buf.iter().cloned().collect()
    }

    /// Matching subsequence, oldest first. Never mutates the ring.
    pub fn filtered(&self, filter: &EventFilter) -> Vec<BridgeEvent> {
        self.buf
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }
}
