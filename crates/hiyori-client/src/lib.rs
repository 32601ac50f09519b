pub mod delta;
pub mod reply;
pub mod session;
pub mod sse;
pub mod transport;

pub use delta::DeltaFrame;
pub use reply::{read_reply, ReplyDecoder};
pub use session::{
    ChatSession, RequestPhase, SendOutcome, TranscriptView, CLIENT_HISTORY_LIMIT,
};
pub use sse::{consume, SseBatch, Utf8Decoder, DONE_SENTINEL};
pub use transport::{ChatTransport, ChunkStream, HttpTransport, TransportError};
