use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{
    stream::{BoxStream, StreamExt},
    Stream,
};
use parley::{
    models::ui::UiMessage,
    multiplexer::StreamChunk,
    protocol::{encode_sse, UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION},
};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<UiMessage>,
}

// SSE response speaking the AI SDK UI message stream protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }

    /// Encode `chunks` on a separate task. Once the client goes away the
    /// task stops polling and drops the chunk stream, which cancels the
    /// generation behind it.
    pub fn from_chunks(chunks: BoxStream<'static, StreamChunk>) -> Self {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut frames = Box::pin(encode_sse(chunks));
            while let Some(frame) = frames.next().await {
                if tx.send(frame).await.is_err() {
                    tracing::debug!("client disconnected, dropping the stream");
                    break;
                }
            }
        });
        Self::new(ReceiverStream::new(rx))
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let stream = self;
        let body = axum::body::Body::from_stream(stream);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header(UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION)
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

async fn handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> SseResponse {
    tracing::debug!(messages = request.messages.len(), "reply requested");
    SseResponse::from_chunks(state.chat.respond(request.messages))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
}

// simple ask an AI for a response, non streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, StatusCode> {
    match state.chat.ask(&request.prompt).await {
        Ok(generation) => Ok(Json(AskResponse {
            response: generation.text.trim().to_string(),
        })),
        Err(e) => {
            tracing::error!("Failed to answer prompt: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}
