use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};

use hiyori_types::ChatRequest;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("chat endpoint returned status {0}")]
    Status(StatusCode),
    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

/// Opens one streamed reply for a chat request.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:8787`.
    pub fn new(base_url: &str) -> Self {
        Self::with_endpoint(format!("{}/api/chat", base_url.trim_end_matches('/')))
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let resp = self.client.post(&self.endpoint).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_derived_from_base_url() {
        assert_eq!(
            HttpTransport::new("http://localhost:8787/").endpoint(),
            "http://localhost:8787/api/chat"
        );
    }

    #[test]
    fn status_error_mentions_code() {
        let err = TransportError::Status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_string(),
            "chat endpoint returned status 500 Internal Server Error"
        );
    }
}
