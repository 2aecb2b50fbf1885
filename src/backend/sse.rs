//! Incremental Server-Sent Events parser.
//!
//! Bytes arrive in arbitrary chunks; complete events are returned as soon
//! as their terminating blank line has been seen. Only the `event` and
//! `data` fields are interpreted; comments and other fields are ignored.
//! An event that grows past the size limit without completing is an error.

use bytes::{Buf, BytesMut};

use crate::error::StoreError;

/// Default limit on one buffered event, matching the config size limit.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 10 * 1024 * 1024;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Buffers a byte stream and splits it into events.
#[derive(Debug)]
pub struct SseParser {
    buf: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    max_event_size: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_SIZE)
    }
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that rejects events larger than `max_event_size`
    /// bytes.
    #[must_use]
    pub fn with_limit(max_event_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            max_event_size,
        }
    }

    /// Feeds a chunk and returns every event it completed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EventTooLarge`] once an unfinished line or
    /// event exceeds the limit. The parser should be dropped with its
    /// stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, StoreError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        if self.buf.len() + self.data_len > self.max_event_size {
            return Err(StoreError::EventTooLarge {
                limit: self.max_event_size,
            });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
