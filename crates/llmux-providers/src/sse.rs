//! Line-oriented server-sent events reader.
//!
//! Reads arrive at arbitrary byte boundaries, so raw bytes are held until a
//! `\n` completes a line. Decoding to UTF-8 happens per complete line, which
//! keeps multi-byte characters intact when a read splits them.

use std::fmt;

/// Payload vendors send to mark the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One `data:` line, tagged with the `event:` name in effect for its block.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    /// Payload after the `data:` marker and its optional leading space
    pub data: String,
}

impl SseEvent {
    /// Whether the payload is the end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Incremental reader over an event-stream body.
#[derive(Default)]
pub struct SseParser {
    pending: Vec<u8>,
    block_event: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the connection.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Signal end of input: an unterminated final line becomes readable.
    pub fn end(&mut self) {
        if self.pending.last().is_some_and(|&b| b != b'\n') {
            self.pending.push(b'\n');
        }
    }

    /// Take the next `data:` line out of the pending bytes, if one is
    /// complete. Everything else is consumed without producing an event.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            let line = text.strip_suffix('\r').unwrap_or(&text);

            if line.is_empty() {
                // Block boundary
                self.block_event = None;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (name, value) = split_field(line);
            match name {
                "data" => {
                    return Some(SseEvent {
                        event: self.block_event.clone(),
                        data: value.to_string(),
                    })
                }
                "event" => self.block_event = Some(value.to_string()),
                // id, retry and unknown fields carry nothing we use
                _ => {}
            }
        }
        None
    }

    /// Drop pending bytes and block state.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.block_event = None;
    }
}

/// `name: value` with at most one leading space stripped from the value.
/// A line without a colon is a field name with an empty value.
fn split_field(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("pending_bytes", &self.pending.len())
            .field("block_event", &self.block_event)
            .finish()
    }
}
