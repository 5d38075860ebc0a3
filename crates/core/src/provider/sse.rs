//! Server-sent event decoding for status streams.

use serde_json::Value;

/// Incremental SSE decoder yielding JSON object payloads.
///
/// `data:` lines accumulate until a blank line ends the event; the joined
/// data is parsed as JSON. Other fields are ignored, as are payloads that
/// are not JSON objects.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    ///
    /// Chunks may split lines, or UTF-8 sequences, anywhere.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.handle_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flushes an event left unterminated at end of stream.
    pub fn finish(&mut self) -> Option<Value> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            if let Some(event) = self.handle_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn handle_line(&mut self, line: &str) -> Option<Value> {
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.trim_start().to_string());
            return None;
        }
        if line.trim().is_empty() {
            return self.dispatch();
        }
        None
    }

    fn dispatch(&mut self) -> Option<Value> {
        if self.data_lines.is_empty() {
            return None;
        }
        let joined = std::mem::take(&mut self.data_lines).join("\n");
        let raw = joined.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Skipping non-JSON status event: {}", e);
                None
            }
        }
    }
}
