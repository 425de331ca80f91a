//! Incremental Server-Sent Events parser for streaming completions.
//!
//! Only the parts the completion stream uses are handled: `data:` fields
//! (multi-line data joined with `\n`), `event:` names, comment lines and the
//! blank-line event boundary.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```

/// A parsed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Whether this is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Feeds byte chunks in, yields complete events out.
///
/// Bytes are buffered until a full line arrives, so a UTF-8 character split
/// across chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk; returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let line = std::mem::take(&mut self.line);
            if let Some(event) = self.take_raw_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Emit whatever is buffered once the byte stream has ended.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            let _ = self.take_raw_line(&line);
        }
        self.build()
    }

    fn take_raw_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        self.take_line(&line)
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.build();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => return None,
        };
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event_type = Some(value.to_owned()),
            _ => {}
        }
        None
    }

    fn build(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event_type = None;
            return None;
        }
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(event)
    }
}
