use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::response::Response;
use futures::StreamExt;

use hiyori_providers::{ByteStream, InferenceRequest, Provider};
use hiyori_types::Message;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/// Opens the backend stream for an already composed conversation. The bytes
/// are returned exactly as the backend produced them.
pub async fn relay(provider: &dyn Provider, conversation: Vec<Message>) -> anyhow::Result<ByteStream> {
    provider.run(InferenceRequest::streaming(conversation)).await
}

/// Wraps a backend stream as a long-lived event-stream response.
pub fn stream_response(stream: ByteStream, correlation_id: String) -> Response {
    let logged = stream.inspect(move |chunk| {
        if let Err(err) = chunk {
            tracing::warn!(
                "backend stream failed mid-reply (correlation_id={}): {}",
                correlation_id,
                err
            );
        }
    });
    let mut response = Response::new(Body::from_stream(logged));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
