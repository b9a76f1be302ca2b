//! Incremental parser for the bridge's blank-line-delimited event framing.
//!
//! The event stream is plain text. A frame ends at a blank line; within a
//! frame an `event:` field names the event type (defaulting to `message`)
//! and one or more `data:` lines carry the payload text, concatenated
//! without the prefix. A frame with no data content is discarded.
//!
//! The parser is resumable across partial reads: bytes that do not yet form
//! a complete frame stay buffered until the next `feed`.

/// One complete frame lifted off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type from the `event:` field (`message` if absent).
    pub event: String,
    /// Concatenated payload text from all `data:` lines.
    pub data: String,
}

/// Resumable frame parser over an incrementally growing byte buffer.
///
/// Buffers raw bytes and splits on the frame delimiter before any text
/// decoding, so a multi-byte character straddling two reads is reassembled
/// intact instead of decoded piecewise.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return every frame completed by them, in order.
    ///
    /// Only complete frames are decoded. Invalid UTF-8 within a frame is
    /// replaced rather than rejected; the stream is text and a mangled
    /// frame is dropped downstream, never fatal.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(idx) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw = String::from_utf8_lossy(&self.buf[..idx]).into_owned();
            self.buf.drain(..idx + 2);
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Parse a single raw frame body (without its terminating blank line).
///
/// Returns `None` for frames with no data content.
fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = "message".to_string();
    let mut data = String::new();

    for line in raw.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseFrame { event, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: CHUNK\ndata: {\"a\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "CHUNK");
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn test_default_event_type() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"data: hello\n\n");
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn test_multi_data_lines_concatenated() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: RESULT\ndata: {\"x\":\ndata: 1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"x\":1}");
    }

    #[test]
    fn test_partial_read_resumes() {
        let mut parser = FrameParser::new();
        assert!(parser.feed(b"event: CHUNK\nda").is_empty());
        assert!(parser.pending_len() > 0);

        let frames = parser.feed(b"ta: abc\n\nevent: RE");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "CHUNK");
        assert_eq!(frames[0].data, "abc");

        let frames = parser.feed(b"SULT\ndata: done\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "RESULT");
        assert_eq!(frames[0].data, "done");
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut parser = FrameParser::new();
        let full = "data: héllo\n\n".as_bytes();
        // Split between the two bytes of 'é'.
        let mid = full.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(parser.feed(&full[..mid]).is_empty());
        let frames = parser.feed(&full[mid..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"data: one\n\ndata: two\n\ndata: three\n\n");
        let texts: Vec<&str> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_frame_without_data_discarded() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: PING\n\ndata: kept\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "kept");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"id: 7\nretry: 100\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }
}
