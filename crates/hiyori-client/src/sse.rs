//! Incremental Server-Sent-Events framing.
//!
//! [`consume`] is a pure function: all state between reads is the remainder
//! string, which the caller threads into the next call.

/// Payload that marks the end of a streamed reply. The decoder returns it like
/// any other payload; interpreting it is up to the caller.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseBatch {
    pub events: Vec<String>,
    pub remainder: String,
}

pub fn consume(buffer: &str, new_text: &str) -> SseBatch {
    let pending = buffer
        .chars()
        .chain(new_text.chars())
        .filter(|c| *c != '\r')
        .collect::<String>();

    let mut events = Vec::new();
    let mut start = 0;
    while let Some(pos) = pending[start..].find("\n\n") {
        let block = &pending[start..start + pos];
        start += pos + 2;
        if let Some(payload) = data_payload(block) {
            events.push(payload);
        }
    }

    SseBatch {
        events,
        remainder: pending[start..].to_string(),
    }
}

// Blocks without any `data:` line (comments, keep-alives, bare `event:`
// lines) produce no payload.
fn data_payload(block: &str) -> Option<String> {
    let lines = block
        .split('\n')
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Turns byte chunks into text without splitting multi-byte characters that
/// straddle a chunk boundary. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // incomplete tail, wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes bytes still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
