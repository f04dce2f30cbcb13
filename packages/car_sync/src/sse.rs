//! `text/event-stream` framing.
//!
//! Wire format: UTF-8 lines terminated by LF, CRLF or CR. A blank line ends a
//! frame. `event:` names the frame, `data:` lines are joined with `\n`, `id:`
//! and `retry:` are carried through, lines starting with `:` are comments.

use std::time::Duration;

/// Upper bound on buffered bytes without a line terminator.
const MAX_PENDING_LINE: usize = 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `message` when the frame had no `event:` field.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
    /// Reconnection delay hint from a `retry:` field.
    pub retry: Option<Duration>,
}

/// Incremental decoder: feed body chunks as they arrive, collect frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    skip_lf: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<Duration>,
    has_fields: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of the body. Frames completed by this chunk are returned
    /// in stream order; a partial trailing line stays buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' | b'\r' => {
                    self.skip_lf = byte == b'\r';
                    let line = std::mem::take(&mut self.pending);
                    if let Some(frame) = self.process_line(&line) {
                        frames.push(frame);
                    }
                }
                _ => {
                    if self.pending.len() >= MAX_PENDING_LINE {
                        tracing::warn!(
                            limit = MAX_PENDING_LINE,
                            "event-stream line exceeds limit, discarding"
                        );
                        self.pending.clear();
                        self.reset_frame();
                    }
                    self.pending.push(byte);
                }
            }
        }
        frames
    }

    /// Drop any partially received frame (used when a connection ends).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.skip_lf = false;
        self.reset_frame();
    }

    fn reset_frame(&mut self) {
        self.event = None;
        self.data.clear();
        self.id = None;
        self.retry = None;
        self.has_fields = false;
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_prefix('\u{feff}').unwrap_or(&line);
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => return None,
        }
        self.has_fields = true;
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if !self.has_fields {
            return None;
        }
        let frame = SseFrame {
            event: self
                .event
                .take()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };
        self.reset_frame();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_named_event() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"event: snapshot\ndata: {\"ts_ms\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "snapshot");
        assert_eq!(frames[0].data, "{\"ts_ms\":1}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"event: del").is_empty());
        assert!(dec.feed(b"ta\ndata: {\"a\"").is_empty());
        let frames = dec.feed(b":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "delta");
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_crlf_terminators() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"event: heartbeat\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: x\r").is_empty());
        assert!(dec.feed(b"\n\r").len() == 1);
        // the dangling CR's LF must not produce a second frame
        assert!(dec.feed(b"\n").is_empty());
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"data: a\ndata: b\n\n");
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_comments_and_blank_frames_are_skipped() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b": keepalive\n\n\nevent: heartbeat\ndata:\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
        assert_eq!(frames[0].data, "");
    }

    #[test]
    fn test_retry_and_id_fields() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"id: 7\nretry: 2500\ndata: x\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].retry, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut dec = SseDecoder::new();
        dec.feed(b"event: snapshot\ndata: {\"ts");
        dec.reset();
        let frames = dec.feed(b"event: heartbeat\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
    }
}
