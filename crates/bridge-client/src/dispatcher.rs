//! Bridge dispatcher: the public client surface.
//!
//! The dispatcher owns the one physical connection and multiplexes every
//! logical invocation over it. Callers interact only through `invoke`,
//! `cancel` and `subscribe`; the read loop is the single task feeding wire
//! events into the registry, so per-connection ordering is preserved by
//! construction, and caller-side calls serialize on the registry mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_protocol::{AgentInfo, BridgeEvent, CancelRequest, InvokeRequest, ToolInfo};

use crate::api::{ControlApi, HttpControlApi};
use crate::config::{BridgeConfig, ReconnectPolicy};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{CompletionWaiter, InvocationOutcome, InvocationRegistry};
use crate::ring::{EventFilter, EventRing};
use crate::transport;
use crate::view::{LogLine, render_log_lines};

/// Size of the broadcast channel fanning events out to subscribers.
const EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Public handle types
// ============================================================================

/// Options for an invoke call.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Whether output should be streamed as chunks.
    pub stream: bool,
    /// Client-side deadline; falls back to the config default.
    pub timeout_ms: Option<u64>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            stream: true,
            timeout_ms: None,
        }
    }
}

/// Handle to one accepted invocation.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    /// Server-assigned request id.
    pub req_id: String,
    waiter: CompletionWaiter,
}

impl InvocationHandle {
    /// Wait for the terminal outcome.
    pub async fn wait(self) -> InvocationOutcome {
        self.waiter.wait().await
    }

    /// Terminal outcome if already reached, without waiting.
    pub fn peek(&self) -> Option<InvocationOutcome> {
        self.waiter.peek()
    }
}

/// Lifecycle of the shared event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// No subscription has been started (or it was cleanly shut down).
    Idle,
    /// Trying to (re-)establish the subscription.
    Connecting,
    /// The stream is live.
    Connected,
    /// The stream failed and has not been re-established.
    Lost,
}

/// Ongoing, restartable view over the ring plus future matching events.
///
/// Ends after a `DISCONNECT` is delivered or when the dispatcher goes away;
/// dropping the subscription unsubscribes.
pub struct EventSubscription {
    backlog: std::collections::VecDeque<BridgeEvent>,
    rx: broadcast::Receiver<BridgeEvent>,
    filter: EventFilter,
    ended: bool,
}

impl EventSubscription {
    /// Next matching event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<BridgeEvent> {
        if self.ended {
            return None;
        }
        if let Some(event) = self.backlog.pop_front() {
            if matches!(event, BridgeEvent::Disconnect { .. }) {
                self.ended = true;
            }
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if matches!(event, BridgeEvent::Disconnect { .. }) {
                        self.ended = true;
                        return Some(event);
                    }
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event subscriber lagged, skipped {n} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.ended = true;
                    return None;
                }
            }
        }
    }
}

// ============================================================================
// Dispatcher internals
// ============================================================================

struct Connection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared between the dispatcher surface and the read loop.
pub(crate) struct Inner {
    config: BridgeConfig,
    api: Arc<dyn ControlApi>,
    /// Dedicated client for the stream subscription. Deliberately has no
    /// request timeout: the subscription is long-lived and mostly idle.
    stream_client: reqwest::Client,
    registry: Mutex<InvocationRegistry>,
    ring: Mutex<EventRing>,
    event_tx: broadcast::Sender<BridgeEvent>,
    status_tx: watch::Sender<TransportStatus>,
    /// Pending per-invocation timeout timers, keyed by `req_id`.
    timeouts: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn events_url(&self) -> String {
        format!("{}/bridge/events", self.config.base_url)
    }

    pub(crate) fn stream_client(&self) -> &reqwest::Client {
        &self.stream_client
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectPolicy {
        self.config.reconnect.clone()
    }

    pub(crate) fn mark_connected(&self) {
        self.status_tx.send_replace(TransportStatus::Connected);
    }

    pub(crate) fn mark_connecting(&self) {
        self.status_tx.send_replace(TransportStatus::Connecting);
    }

    /// Apply one wire event. Called only from the read loop (or tests), so
    /// events for a connection are processed strictly in arrival order.
    pub(crate) async fn handle_wire_event(&self, event: BridgeEvent) {
        if matches!(event, BridgeEvent::Disconnect { .. }) {
            self.on_disconnect(event).await;
            return;
        }

        use crate::registry::EventDisposition;
        let disposition = self.registry.lock().await.apply(&event);
        match disposition {
            EventDisposition::Applied { now_terminal } => {
                self.publish(event.clone()).await;
                if now_terminal {
                    // Only invocation-scoped events can be terminal.
                    let req_id = event.req_id().unwrap_or_default().to_string();
                    self.clear_timeout(&req_id).await;
                    self.registry.lock().await.sweep();
                }
            }
            EventDisposition::AfterTerminal => {
                warn!(
                    "anomaly: {} for terminal req_id '{}' discarded",
                    event.kind(),
                    event.req_id().unwrap_or("?")
                );
            }
            EventDisposition::UnknownReqId => {
                warn!(
                    "anomaly: {} for unknown req_id '{}' discarded",
                    event.kind(),
                    event.req_id().unwrap_or("?")
                );
            }
            EventDisposition::NotInvocationScoped => {
                self.publish(event).await;
            }
        }
    }

    /// Transport lost (server notice or locally synthesized): fail every
    /// non-terminal invocation and tell observers.
    async fn on_disconnect(&self, event: BridgeEvent) {
        let failed = self.registry.lock().await.fail_all("transport_lost");
        if !failed.is_empty() {
            info!("transport lost, failed {} in-flight invocation(s)", failed.len());
        }
        for req_id in &failed {
            self.clear_timeout(req_id).await;
        }
        self.registry.lock().await.sweep();
        self.status_tx.send_replace(TransportStatus::Lost);
        self.publish(event).await;
    }

    /// Append to the ring and fan out, atomically with respect to
    /// `subscribe` so a subscriber sees each event exactly once.
    async fn publish(&self, event: BridgeEvent) {
        let mut ring = self.ring.lock().await;
        ring.push(event.clone());
        let _ = self.event_tx.send(event);
    }

    /// Arm the client-side deadline for one invocation.
    async fn arm_timeout(self: &Arc<Self>, req_id: String, timeout_ms: u64) {
        let inner = Arc::clone(self);
        let id = req_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            inner.fire_timeout(&id).await;
        });
        self.timeouts.lock().await.insert(req_id, handle);
    }

    async fn fire_timeout(&self, req_id: &str) {
        self.timeouts.lock().await.remove(req_id);
        let timed_out = self.registry.lock().await.apply_timeout(req_id);
        if timed_out {
            debug!("invocation '{req_id}' timed out client-side");
            self.registry.lock().await.sweep();
        }
    }

    async fn clear_timeout(&self, req_id: &str) {
        if let Some(handle) = self.timeouts.lock().await.remove(req_id) {
            handle.abort();
        }
    }

    async fn clear_all_timeouts(&self) {
        for (_, handle) in self.timeouts.lock().await.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Client for issuing tool invocations and observing their event stream.
pub struct BridgeDispatcher {
    inner: Arc<Inner>,
    conn: Mutex<Option<Connection>>,
}

impl BridgeDispatcher {
    /// Create a dispatcher talking HTTP to the configured base URL.
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        let api = HttpControlApi::new(config.base_url.clone(), config.token.clone())?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Create a dispatcher over a custom control API (used by tests).
    pub fn with_api(config: BridgeConfig, api: Arc<dyn ControlApi>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (status_tx, _) = watch::channel(TransportStatus::Idle);
        let ring_capacity = config.ring_capacity;
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                stream_client: reqwest::Client::new(),
                registry: Mutex::new(InvocationRegistry::new()),
                ring: Mutex::new(EventRing::new(ring_capacity)),
                event_tx,
                status_tx,
                timeouts: Mutex::new(HashMap::new()),
            }),
            conn: Mutex::new(None),
        }
    }

    /// Open the shared event stream and start the read loop.
    ///
    /// Fails with a transport error on non-success status; no-op if the
    /// stream is already live.
    pub async fn connect(&self) -> BridgeResult<()> {
        let mut conn = self.conn.lock().await;
        if let Some(existing) = conn.as_ref()
            && !existing.task.is_finished()
        {
            debug!("connect: stream already live");
            return Ok(());
        }

        let previous = *self.inner.status_tx.borrow();
        self.inner.mark_connecting();
        let url = self.inner.events_url();
        let response =
            match transport::subscribe(self.inner.stream_client(), &url, self.inner.token()).await
            {
                Ok(r) => r,
                Err(e) => {
                    self.inner.status_tx.send_replace(previous);
                    return Err(e);
                }
            };

        // Mark before spawning so callers observe the live stream as soon
        // as connect() returns, without waiting for the task to schedule.
        self.inner.mark_connected();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(transport::run(
            Arc::clone(&self.inner),
            response,
            cancel.clone(),
        ));
        *conn = Some(Connection { cancel, task });
        info!("event stream connected to {url}");
        Ok(())
    }

    /// Cancel the read loop and release the connection.
    ///
    /// In-flight invocations can no longer complete and are failed locally.
    pub async fn disconnect(&self) {
        let Some(connection) = self.conn.lock().await.take() else {
            return;
        };
        connection.cancel.cancel();
        let _ = connection.task.await;

        let failed = self.inner.registry.lock().await.fail_all("client_disconnect");
        for req_id in &failed {
            self.inner.clear_timeout(req_id).await;
        }
        self.inner.clear_all_timeouts().await;
        self.inner.registry.lock().await.sweep();
        self.inner.status_tx.send_replace(TransportStatus::Idle);
        info!("event stream disconnected");
    }

    /// Current transport status.
    pub fn status(&self) -> TransportStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch transport status changes.
    pub fn status_watch(&self) -> watch::Receiver<TransportStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Submit an invocation and return its handle once the server accepts.
    ///
    /// Arguments must be a JSON object; validation failures surface before
    /// any network call. Fails fast with `Disconnected` while the stream is
    /// lost — retry after the status watch reports `Connected`.
    pub async fn invoke(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: Value,
        opts: InvokeOptions,
    ) -> BridgeResult<InvocationHandle> {
        if !arguments.is_object() {
            return Err(BridgeError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            ));
        }
        if self.status() == TransportStatus::Lost {
            return Err(BridgeError::Disconnected);
        }

        let timeout_ms = opts
            .timeout_ms
            .unwrap_or(self.inner.config.default_timeout_ms);
        let response = self
            .inner
            .api
            .invoke(InvokeRequest {
                agent_id: agent_id.to_string(),
                tool_name: tool_name.to_string(),
                arguments,
                stream: opts.stream,
                timeout_ms,
            })
            .await?;

        let waiter = {
            let mut registry = self.inner.registry.lock().await;
            // Terminal entries whose last waiter was dropped since the
            // terminal-transition sweep are evicted here.
            registry.sweep();
            registry.insert_pending(&response.req_id, agent_id)
        };
        self.inner
            .arm_timeout(response.req_id.clone(), timeout_ms)
            .await;

        debug!("invocation accepted: req_id='{}' tool='{tool_name}'", response.req_id);
        Ok(InvocationHandle {
            req_id: response.req_id,
            waiter,
        })
    }

    /// Request cancellation of a running invocation.
    ///
    /// Idempotent: unknown or already-terminal request ids succeed as a
    /// no-op without a network call.
    pub async fn cancel(&self, agent_id: &str, req_id: &str, reason: &str) -> BridgeResult<()> {
        if self
            .inner
            .registry
            .lock()
            .await
            .is_terminal_or_unknown(req_id)
        {
            debug!("cancel no-op for req_id='{req_id}'");
            return Ok(());
        }

        self.inner
            .api
            .cancel(CancelRequest {
                agent_id: agent_id.to_string(),
                req_id: req_id.to_string(),
                reason: reason.to_string(),
            })
            .await
    }

    /// Subscribe to ring history plus future events matching the filter.
    pub async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        // Hold the ring lock so no event lands between snapshot and rx.
        let ring = self.inner.ring.lock().await;
        let rx = self.inner.event_tx.subscribe();
        let backlog = ring.filtered(&filter).into();
        EventSubscription {
            backlog,
            rx,
            filter,
            ended: false,
        }
    }

    /// Snapshot of all retained events, oldest first.
    pub async fn events(&self) -> Vec<BridgeEvent> {
        self.inner.ring.lock().await.snapshot()
    }

    /// Snapshot of retained events matching the filter, oldest first.
    pub async fn filtered_events(&self, filter: &EventFilter) -> Vec<BridgeEvent> {
        self.inner.ring.lock().await.filtered(filter)
    }

    /// Drop all retained events.
    pub async fn clear_events(&self) {
        self.inner.ring.lock().await.clear();
    }

    /// Render the filtered event history as display log lines.
    pub async fn render_log(&self, filter: &EventFilter) -> Vec<LogLine> {
        let events = self.filtered_events(filter).await;
        render_log_lines(&events)
    }

    /// Cumulative upstream loss recorded for one invocation, if tracked.
    pub async fn drop_totals(&self, req_id: &str) -> Option<(u64, u64)> {
        self.inner
            .registry
            .lock()
            .await
            .get(req_id)
            .map(|inv| (inv.total_dropped_bytes, inv.total_dropped_lines))
    }

    /// List agents from the read-only catalog.
    pub async fn list_agents(&self) -> BridgeResult<Vec<AgentInfo>> {
        self.inner.api.list_agents().await
    }

    /// List tools exposed by one agent.
    pub async fn list_tools(&self, agent_id: &str) -> BridgeResult<Vec<ToolInfo>> {
        self.inner.api.list_tools(agent_id).await
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InvocationState;
    use async_trait::async_trait;
    use bridge_protocol::{ChunkChannel, ChunkPayload, InvokeResponse};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockControlApi {
        invokes: StdMutex<Vec<InvokeRequest>>,
        cancels: StdMutex<Vec<CancelRequest>>,
        next_id: AtomicUsize,
    }

    #[async_trait]
    impl ControlApi for MockControlApi {
        async fn invoke(&self, request: InvokeRequest) -> BridgeResult<InvokeResponse> {
            self.invokes.lock().unwrap().push(request);
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(InvokeResponse {
                req_id: format!("r{n}"),
            })
        }

        async fn cancel(&self, request: CancelRequest) -> BridgeResult<()> {
            self.cancels.lock().unwrap().push(request);
            Ok(())
        }

        async fn list_agents(&self) -> BridgeResult<Vec<AgentInfo>> {
            Ok(vec![AgentInfo {
                agent_id: "a1".to_string(),
                description: None,
            }])
        }

        async fn list_tools(&self, _agent_id: &str) -> BridgeResult<Vec<ToolInfo>> {
            Ok(vec![ToolInfo {
                name: "search".to_string(),
                description: None,
            }])
        }
    }

    fn dispatcher() -> (BridgeDispatcher, Arc<MockControlApi>) {
        let api = Arc::new(MockControlApi::default());
        let dispatcher = BridgeDispatcher::with_api(BridgeConfig::default(), api.clone());
        (dispatcher, api)
    }

    fn chunk(req_id: &str, data: &str) -> BridgeEvent {
        BridgeEvent::Chunk {
            req_id: req_id.to_string(),
            agent_id: Some("a1".to_string()),
            ts: 0,
            payload: ChunkPayload {
                channel: ChunkChannel::Stdout,
                data: data.to_string(),
                dropped_bytes: 0,
                dropped_lines: 0,
            },
        }
    }

    fn result(req_id: &str, payload: Value) -> BridgeEvent {
        BridgeEvent::Result {
            req_id: req_id.to_string(),
            agent_id: Some("a1".to_string()),
            ts: 0,
            payload,
        }
    }

    fn disconnect() -> BridgeEvent {
        BridgeEvent::Disconnect {
            agent_id: None,
            ts: 0,
            payload: json!({"reason": "transport_lost"}),
        }
    }

    async fn state_of(dispatcher: &BridgeDispatcher, req_id: &str) -> InvocationState {
        dispatcher
            .inner()
            .registry
            .lock()
            .await
            .get(req_id)
            .expect("invocation should exist")
            .state
    }

    #[tokio::test]
    async fn test_invoke_rejects_non_object_arguments() {
        let (dispatcher, api) = dispatcher();
        let err = dispatcher
            .invoke("a1", "search", json!("not an object"), InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments(_)));
        // Validation failed before any network call.
        assert!(api.invokes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let (dispatcher, _api) = dispatcher();
        let handle = dispatcher
            .invoke("a1", "search", json!({"q": "x"}), InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.req_id, "r1");
        assert_eq!(state_of(&dispatcher, "r1").await, InvocationState::Pending);

        let inner = dispatcher.inner();
        // Chunks without a preceding ack advance PENDING -> STREAMING directly.
        inner.handle_wire_event(chunk("r1", "hello")).await;
        assert_eq!(state_of(&dispatcher, "r1").await, InvocationState::Streaming);
        inner.handle_wire_event(chunk("r1", " world")).await;
        inner
            .handle_wire_event(result("r1", json!({"status": "ok"})))
            .await;

        match handle.wait().await {
            InvocationOutcome::Completed(v) => assert_eq!(v, json!({"status": "ok"})),
            other => panic!("expected completed, got {other:?}"),
        }

        let lines = dispatcher.render_log(&EventFilter::any().req("r1")).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", " world", "[result] {\"status\":\"ok\"}"]);
    }

    #[tokio::test]
    async fn test_ack_advances_pending_to_acked() {
        let (dispatcher, _api) = dispatcher();
        let _handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        dispatcher
            .inner()
            .handle_wire_event(BridgeEvent::InvokeAck {
                req_id: "r1".to_string(),
                agent_id: Some("a1".to_string()),
                ts: 0,
                payload: Value::Null,
            })
            .await;
        assert_eq!(state_of(&dispatcher, "r1").await, InvocationState::Acked);
    }

    #[tokio::test]
    async fn test_terminal_event_is_idempotent() {
        let (dispatcher, _api) = dispatcher();
        let handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        let inner = dispatcher.inner();
        inner.handle_wire_event(result("r1", json!({"n": 1}))).await;
        inner.handle_wire_event(result("r1", json!({"n": 2}))).await;
        inner.handle_wire_event(chunk("r1", "late")).await;

        match handle.wait().await {
            InvocationOutcome::Completed(v) => assert_eq!(v, json!({"n": 1})),
            other => panic!("expected first result to win, got {other:?}"),
        }
        // Discarded events never reach the ring.
        assert_eq!(dispatcher.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_evicts_stale_terminal_entries() {
        let (dispatcher, _api) = dispatcher();
        let handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        dispatcher
            .inner()
            .handle_wire_event(result("r1", json!({"status": "ok"})))
            .await;
        // The handle still observes r1, so the terminal sweep kept it.
        assert_eq!(dispatcher.inner().registry.lock().await.len(), 1);
        drop(handle);

        let _h2 = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();
        let registry = dispatcher.inner().registry.lock().await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("r1").is_none());
        assert!(registry.get("r2").is_some());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (dispatcher, api) = dispatcher();

        // Unknown req_id: success, no network call.
        dispatcher.cancel("a1", "ghost", "user_cancel").await.unwrap();
        assert!(api.cancels.lock().unwrap().is_empty());

        // Live invocation: cancel goes out.
        let handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();
        dispatcher.cancel("a1", "r1", "user_cancel").await.unwrap();
        assert_eq!(api.cancels.lock().unwrap().len(), 1);

        // Terminal: back to a no-op.
        dispatcher
            .inner()
            .handle_wire_event(BridgeEvent::CancelAck {
                req_id: "r1".to_string(),
                agent_id: None,
                ts: 0,
                payload: Value::Null,
            })
            .await;
        dispatcher.cancel("a1", "r1", "user_cancel").await.unwrap();
        assert_eq!(api.cancels.lock().unwrap().len(), 1);

        match handle.wait().await {
            InvocationOutcome::Cancelled(_) => {}
            other => panic!("expected cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_side_timeout() {
        let (dispatcher, _api) = dispatcher();
        let handle = dispatcher
            .invoke(
                "a1",
                "search",
                json!({}),
                InvokeOptions {
                    stream: true,
                    timeout_ms: Some(40),
                },
            )
            .await
            .unwrap();

        assert_eq!(handle.wait().await, InvocationOutcome::TimedOut);

        // A late result after the timeout is discarded.
        dispatcher
            .inner()
            .handle_wire_event(result("r1", json!({"status": "ok"})))
            .await;
        assert!(dispatcher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_and_invoke_fails_fast() {
        let (dispatcher, _api) = dispatcher();
        let handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        dispatcher.inner().handle_wire_event(disconnect()).await;

        match handle.wait().await {
            InvocationOutcome::Failed { reason } => assert_eq!(reason, "transport_lost"),
            other => panic!("expected transport_lost failure, got {other:?}"),
        }
        assert_eq!(dispatcher.status(), TransportStatus::Lost);

        let err = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected));
    }

    #[tokio::test]
    async fn test_subscription_backlog_then_live() {
        let (dispatcher, _api) = dispatcher();
        let _handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        let inner = dispatcher.inner();
        inner.handle_wire_event(chunk("r1", "early")).await;

        let mut sub = dispatcher.subscribe(EventFilter::any().req("r1")).await;
        inner.handle_wire_event(chunk("r1", "live")).await;
        inner.handle_wire_event(disconnect()).await;

        let first = sub.next().await.unwrap();
        assert_eq!(first.kind(), "CHUNK");
        let second = sub.next().await.unwrap();
        assert_eq!(second.kind(), "CHUNK");
        let third = sub.next().await.unwrap();
        assert_eq!(third.kind(), "DISCONNECT");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_filter_excludes_other_requests() {
        let (dispatcher, _api) = dispatcher();
        let _h1 = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();
        let _h2 = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        let mut sub = dispatcher.subscribe(EventFilter::any().req("r2")).await;
        let inner = dispatcher.inner();
        inner.handle_wire_event(chunk("r1", "other")).await;
        inner.handle_wire_event(chunk("r2", "mine")).await;

        let event = sub.next().await.unwrap();
        assert_eq!(event.req_id(), Some("r2"));
    }

    #[tokio::test]
    async fn test_drop_totals_and_clear() {
        let (dispatcher, _api) = dispatcher();
        let _handle = dispatcher
            .invoke("a1", "search", json!({}), InvokeOptions::default())
            .await
            .unwrap();

        dispatcher
            .inner()
            .handle_wire_event(BridgeEvent::Chunk {
                req_id: "r1".to_string(),
                agent_id: Some("a1".to_string()),
                ts: 0,
                payload: ChunkPayload {
                    channel: ChunkChannel::Stdout,
                    data: "x".to_string(),
                    dropped_bytes: 5,
                    dropped_lines: 1,
                },
            })
            .await;

        assert_eq!(dispatcher.drop_totals("r1").await, Some((5, 1)));

        let lines = dispatcher.render_log(&EventFilter::any()).await;
        assert_eq!(lines[0].text, "[dropped] bytes=5 lines=1");
        assert_eq!(lines[1].text, "x");

        dispatcher.clear_events().await;
        assert!(dispatcher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_passthrough() {
        let (dispatcher, _api) = dispatcher();
        let agents = dispatcher.list_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_id, "a1");

        let tools = dispatcher.list_tools("a1").await.unwrap();
        assert_eq!(tools[0].name, "search");
    }
}
