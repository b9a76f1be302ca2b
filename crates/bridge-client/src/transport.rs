//! Shared event-stream transport.
//!
//! One dispatcher owns exactly one live subscription. The read loop runs on
//! a dedicated task, feeds the frame parser, and hands each completed event
//! to the dispatcher strictly in arrival order, one at a time. A
//! caller-initiated disconnect cancels the loop immediately; an unexpected
//! stream failure synthesizes a `DISCONNECT` event and, if the reconnect
//! policy allows, re-subscribes with bounded exponential backoff and jitter.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use bridge_protocol::{BridgeEvent, FrameParser};

use crate::dispatcher::Inner;
use crate::error::{BridgeError, BridgeResult};

/// Open the long-lived subscription request.
///
/// Fails immediately on a connection error or non-success status; no events
/// are considered delivered in that case.
pub(crate) async fn subscribe(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> BridgeResult<reqwest::Response> {
    let mut request = client.get(url).header("Accept", "text/event-stream");
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| BridgeError::Transport(format!("subscribe failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BridgeError::Transport(format!(
            "subscribe failed: status {status}"
        )));
    }
    Ok(response)
}

/// Why a single read pass over the stream ended.
enum ReadEnd {
    /// Caller-initiated disconnect.
    Cancelled,
    /// The stream failed or ended without being asked to.
    Lost(String),
}

/// Drive the subscription until cancelled.
///
/// Takes the already-established initial response so that `connect()` can
/// surface subscription failures synchronously; the caller has already
/// marked the transport connected for it.
pub(crate) async fn run(inner: Arc<Inner>, initial: reqwest::Response, cancel: CancellationToken) {
    let url = inner.events_url();
    let mut response = initial;

    loop {
        match read_stream(&inner, response, &cancel).await {
            ReadEnd::Cancelled => {
                debug!("event stream read loop cancelled");
                return;
            }
            ReadEnd::Lost(reason) => {
                warn!("event stream lost: {reason}");
                inner.handle_wire_event(synthesized_disconnect(&reason)).await;
            }
        }

        let policy = inner.reconnect_policy();
        if !policy.enabled {
            return;
        }

        // Bounded exponential backoff with jitter until re-subscribed.
        inner.mark_connecting();
        let mut attempt: u32 = 0;
        response = 'reconnect: loop {
            let delay = policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match subscribe(inner.stream_client(), &url, inner.token()).await {
                Ok(r) => {
                    info!("event stream re-subscribed after {attempt} attempt(s)");
                    break 'reconnect r;
                }
                Err(e) => {
                    debug!("reconnect attempt {attempt} failed: {e}; backing off");
                }
            }
        };
        inner.mark_connected();
    }
}

/// One pass over a live response body: parse frames, dispatch events.
async fn read_stream(
    inner: &Inner,
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> ReadEnd {
    let mut stream = response.bytes_stream();
    let mut parser = FrameParser::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ReadEnd::Cancelled,
            item = stream.next() => match item {
                Some(Ok(bytes)) => {
                    for frame in parser.feed(&bytes) {
                        match BridgeEvent::from_frame(&frame) {
                            Some(event) => inner.handle_wire_event(event).await,
                            None => {
                                warn!("dropping malformed '{}' frame ({} bytes)",
                                    frame.event, frame.data.len());
                            }
                        }
                    }
                }
                Some(Err(e)) => return ReadEnd::Lost(format!("read error: {e}")),
                None => return ReadEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

/// DISCONNECT notice synthesized by the client on unexpected stream loss.
fn synthesized_disconnect(reason: &str) -> BridgeEvent {
    BridgeEvent::Disconnect {
        agent_id: None,
        ts: chrono::Utc::now().timestamp_millis(),
        payload: json!({ "reason": "transport_lost", "detail": reason }),
    }
}
