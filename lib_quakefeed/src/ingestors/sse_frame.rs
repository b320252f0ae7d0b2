//! # Server-Sent Event Decoder
//!
//! Incremental `text/event-stream` parser. Bytes are fed in whatever chunks
//! the transport hands over; complete events come out.
//!
//! Lines end in LF, CRLF or a lone CR. Splitting happens on raw bytes, so a
//! multi-byte UTF-8 character cut by a chunk boundary is reassembled before
//! decoding.
//!
//! An event may hold at most `max_event_bytes` of data plus unterminated
//! line. Past that the event is dropped and its remaining lines are skipped
//! up to the next blank line.

/// Default bound on a single event, 1 MiB.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the server sent none.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last `id:` field seen on the stream, if any.
    pub id: Option<String>,
}

/// Stateful decoder. One per connection.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Bytes held in `data`.
    pending: usize,
    last_id: Option<String>,
    retry_ms: Option<u64>,
    max_event_bytes: usize,
    /// The previous line ended in CR; a leading LF belongs to it.
    after_cr: bool,
    /// Skipping the rest of an oversized event.
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty decoder that drops events larger than `max_event_bytes`.
    pub fn with_limit(max_event_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            pending: 0,
            last_id: None,
            retry_ms: None,
            max_event_bytes,
            after_cr: false,
            discarding: false,
        }
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        while start < self.buffer.len() {
            if std::mem::take(&mut self.after_cr) && self.buffer[start] == b'\n' {
                start += 1;
                continue;
            }
            let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n' || *b == b'\r') else {
                break;
            };
            let end = start + pos;
            self.after_cr = self.buffer[end] == b'\r';

            if self.discarding {
                self.discarding = end > start;
                start = end + 1;
                continue;
            }

            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            if let Some(ev) = self.process_line(&line) {
                out.push(ev);
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() + self.pending > self.max_event_bytes {
            self.buffer.clear();
            self.drop_event();
        }
        out
    }

    /// Reconnection delay the server asked for, if it sent a `retry:` field.
    pub fn retry_hint_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.pending + value.len() > self.max_event_bytes {
                    self.drop_event();
                    return None;
                }
                self.pending += value.len();
                self.data.push(value.to_string());
            }
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            other => log::trace!("Ignoring SSE field `{}`", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        self.pending = 0;
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }

    fn drop_event(&mut self) {
        log::warn!("Dropping SSE event larger than {} bytes", self.max_event_bytes);
        self.event = None;
        self.data.clear();
        self.pending = 0;
        self.discarding = true;
    }
}
