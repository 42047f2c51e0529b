use crate::error::TransportError;

/// Incremental UTF-8 decoder for a chunked byte stream.
///
/// A multi-byte sequence split across chunks is held back until the rest
/// arrives, so every returned fragment is valid text.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still waiting for the end of a sequence
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode as much of `chunk` as possible
    pub fn push(&mut self, chunk: &[u8]) -> Result<String, TransportError> {
        self.pending.extend_from_slice(chunk);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                Ok(text)
            }
            Err(e) => {
                if let Some(len) = e.error_len() {
                    return Err(TransportError::Decode {
                        details: format!(
                            "invalid UTF-8 sequence of {} bytes at offset {}",
                            len,
                            e.valid_up_to()
                        ),
                    });
                }

                let valid = e.valid_up_to();
                let tail = self.pending.split_off(valid);
                let text = String::from_utf8(std::mem::replace(&mut self.pending, tail))
                    .map_err(|e| TransportError::Decode {
                        details: e.to_string(),
                    })?;
                Ok(text)
            }
        }
    }

    /// End of stream; a dangling partial sequence is an error
    pub fn finish(&mut self) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let len = self.pending.len();
        self.pending.clear();
        Err(TransportError::Decode {
            details: format!("stream ended inside a {}-byte partial character", len),
        })
    }
}
