//! Derived log view over bridge events.
//!
//! Pure rendering: upstream loss is surfaced as its own marker line before
//! the chunk's data, so an observer can tell "notice of loss" apart from
//! received content.

use bridge_protocol::{BridgeEvent, ChunkChannel};

/// Display tone of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTone {
    /// Meta information (loss markers, results, acks).
    Muted,
    Stdout,
    Stderr,
}

/// One rendered log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub tone: LogTone,
    pub text: String,
}

impl LogLine {
    fn muted(text: String) -> Self {
        Self {
            tone: LogTone::Muted,
            text,
        }
    }
}

/// Render events into display lines, preserving event order.
pub fn render_log_lines<'a>(events: impl IntoIterator<Item = &'a BridgeEvent>) -> Vec<LogLine> {
    let mut lines = Vec::new();
    for event in events {
        match event {
            BridgeEvent::Chunk { payload, .. } => {
                if payload.dropped_bytes > 0 || payload.dropped_lines > 0 {
                    lines.push(LogLine::muted(format!(
                        "[dropped] bytes={} lines={}",
                        payload.dropped_bytes, payload.dropped_lines
                    )));
                }
                lines.push(LogLine {
                    tone: match payload.channel {
                        ChunkChannel::Stderr => LogTone::Stderr,
                        ChunkChannel::Stdout => LogTone::Stdout,
                    },
                    text: payload.data.clone(),
                });
            }
            BridgeEvent::Result { payload, .. } => {
                lines.push(LogLine::muted(format!(
                    "[result] {}",
                    serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string())
                )));
            }
            BridgeEvent::InvokeAck { payload, .. }
            | BridgeEvent::CancelAck { payload, .. }
            | BridgeEvent::Disconnect { payload, .. } => {
                lines.push(LogLine::muted(format!(
                    "[meta:{}] {}",
                    event.kind(),
                    serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string())
                )));
            }
        }
    }
    lines
}
