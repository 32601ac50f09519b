use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use hiyori_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use hiyori_types::ChatRequest;

use crate::relay::{relay, stream_response};
use crate::AppState;

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("hiyori server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let assets = ServeDir::new(&state.assets_dir);

    Router::new()
        .route("/api/chat", post(chat).fallback(method_not_allowed))
        .route("/api/", any(api_not_found))
        .route("/api/{*rest}", any(api_not_found))
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}

async fn api_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn failure_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorEnvelope {
            error: "Failed to process request".to_string(),
        }),
    )
        .into_response()
}

// The body is read as raw bytes so that a missing or unusual content-type
// header does not reject the request before composition.
async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    let value = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => value,
        Err(err) => {
            report_failure(&correlation_id, None, "CHAT_BODY_INVALID", &err.to_string());
            return failure_response();
        }
    };
    let request = ChatRequest::from_value_lenient(&value);
    let composition = state
        .composer
        .compose(&request.messages, request.locale.as_deref());
    let locale = composition.locale.as_str();

    let provider = match state.providers.active() {
        Ok(provider) => provider,
        Err(err) => {
            report_failure(&correlation_id, Some(locale), "PROVIDER_UNAVAILABLE", &err.to_string());
            return failure_response();
        }
    };
    let info = provider.info();

    if let Some(last) = composition.messages.last() {
        tracing::debug!(
            correlation_id = correlation_id.as_str(),
            "relaying {} messages, last turn {}",
            composition.messages.len(),
            redact_text(&last.content)
        );
    }

    match relay(provider.as_ref(), composition.messages).await {
        Ok(stream) => {
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Server,
                ObservabilityEvent {
                    event: "chat.stream.started",
                    component: "server.chat",
                    correlation_id: Some(&correlation_id),
                    locale: Some(locale),
                    provider_id: Some(&info.id),
                    model_id: Some(&info.model),
                    status: Some("ok"),
                    ..Default::default()
                },
            );
            stream_response(stream, correlation_id)
        }
        Err(err) => {
            report_failure(&correlation_id, Some(locale), "BACKEND_FAILED", &format!("{err:#}"));
            failure_response()
        }
    }
}

fn report_failure(correlation_id: &str, locale: Option<&str>, error_code: &str, detail: &str) {
    emit_event(
        tracing::Level::ERROR,
        ProcessKind::Server,
        ObservabilityEvent {
            event: "chat.request.failed",
            component: "server.chat",
            correlation_id: Some(correlation_id),
            locale,
            status: Some("failed"),
            error_code: Some(error_code),
            detail: Some(detail),
            ..Default::default()
        },
    );
    tracing::error!("Error processing chat request: {}", detail);
}
