use crate::error::UpstreamError;
use serde::Deserialize;
use tracing::trace;

const DONE_MARKER: &str = "[DONE]";

/// A decoded server-sent event from a streaming chat completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text content of one delta (may be empty)
    Delta(String),
    /// The provider's end-of-stream marker
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental decoder for `data:` lines of a chat-completion event stream.
///
/// Network chunks may split lines (and UTF-8 sequences) anywhere, so bytes
/// are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the end marker has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one network chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, UpstreamError> {
        if self.finished {
            return Ok(Vec::new());
        }

        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line[..line.len() - 1])? {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }

        Ok(events)
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, UpstreamError> {
        if self.finished || self.buffer.is_empty() {
            return Ok(Vec::new());
        }

        let line = std::mem::take(&mut self.buffer);
        let event = self.decode_line(&line)?;
        if event == Some(SseEvent::Done) {
            self.finished = true;
        }
        Ok(event.into_iter().collect())
    }

    fn decode_line(&self, raw: &[u8]) -> Result<Option<SseEvent>, UpstreamError> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = std::str::from_utf8(raw).map_err(|e| UpstreamError::Protocol {
            details: format!("event line is not UTF-8: {}", e),
        })?;

        // Blank lines separate events; ':' starts a comment (keep-alive)
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            trace!("Ignoring non-data event field: {}", line);
            return Ok(None);
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == DONE_MARKER {
            return Ok(Some(SseEvent::Done));
        }

        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| UpstreamError::Protocol {
                details: format!("event payload is not JSON: {}", e),
            })?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(UpstreamError::Provider { message });
        }

        let chunk: StreamChunk =
            serde_json::from_value(value).map_err(|e| UpstreamError::Protocol {
                details: format!("unexpected event shape: {}", e),
            })?;

        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .map(SseEvent::Delta))
    }
}
