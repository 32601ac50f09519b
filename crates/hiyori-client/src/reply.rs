use futures::{Stream, StreamExt};

use crate::delta::DeltaFrame;
use crate::sse::{consume, Utf8Decoder, DONE_SENTINEL};

/// Turns the chunks of one streamed reply into text.
///
/// Each chunk is decoded, split into SSE payloads and parsed into delta
/// frames. Text-bearing frames are appended to the reply. Everything after
/// `[DONE]` is ignored.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    utf8: Utf8Decoder,
    buffer: String,
    reply: String,
    done: bool,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk. `on_delta` receives each new delta together with the
    /// whole reply so far.
    pub fn push(&mut self, chunk: &[u8], mut on_delta: impl FnMut(&str, &str)) {
        if self.done {
            return;
        }
        let batch = consume(&self.buffer, &self.utf8.decode(chunk));
        self.buffer = batch.remainder;
        for payload in batch.events {
            if payload == DONE_SENTINEL {
                self.done = true;
                self.buffer.clear();
                return;
            }
            match DeltaFrame::parse(&payload) {
                Ok(frame) => match frame.text() {
                    Some(delta) => {
                        self.reply.push_str(delta);
                        on_delta(delta, &self.reply);
                    }
                    None => tracing::debug!("skipping stream frame without text"),
                },
                Err(err) => tracing::warn!("skipping malformed stream payload: {}", err),
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.reply
    }

    /// Ends the reply. A trailing frame without its blank line never counts.
    pub fn finish(mut self) -> String {
        let held_back = self.utf8.finish();
        let unterminated = self.buffer.len() + held_back.len();
        if !self.done && unterminated > 0 {
            tracing::debug!(
                "discarding {} bytes of unterminated stream data",
                unterminated
            );
        }
        self.reply
    }
}

/// Reads a chunk stream to `[DONE]` or its end and returns the reply text.
/// No chunk after `[DONE]` is pulled. The first stream error aborts the read.
pub async fn read_reply<S, B, E>(
    mut chunks: S,
    mut on_delta: impl FnMut(&str, &str),
) -> Result<String, E>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut decoder = ReplyDecoder::new();
    while let Some(chunk) = chunks.next().await {
        decoder.push(chunk?.as_ref(), &mut on_delta);
        if decoder.is_done() {
            break;
        }
    }
    Ok(decoder.finish())
}
