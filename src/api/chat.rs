//! The chat endpoint and its stream orchestrator.
//!
//! One inbound request forks into three outcomes — a tool-called chart
//! result, a tool-call-absent text result, or a token-streamed reply — and
//! all three are normalized onto the same SSE wire format, closed by exactly
//! one `[DONE]` frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::chart::{chart_tool_descriptor, interpret_reply, ReplyAction};
use crate::error::ChatError;
use crate::protocol::{ChatMessage, ChatRequest};
use crate::routing::needs_chart_mode;
use crate::state::AppState;
use crate::stream::{ChatFrame, SseEmitter};
use crate::upstream::ChatBackend;

/// Bounded frame queue between the orchestrator task and the response body.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// `POST /api/chat` handler.
///
/// Validation failures are rejected with an HTTP error before any stream is
/// opened; after that the response is a `text/event-stream` fed by the
/// orchestrator task.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    use axum::response::IntoResponse;

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return ChatError::InvalidRequest(
                "messages must be an array of {role, content}".to_string(),
            )
            .into_response();
        }
    };
    if request.messages.is_empty() {
        return ChatError::InvalidRequest("messages must not be empty".to_string())
            .into_response();
    }

    let (tx, rx) = mpsc::channel::<Bytes>(FRAME_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut emitter = SseEmitter::new(tx);
        run_chat_stream(&state.upstream, &request.messages, &mut emitter).await;
    });

    sse_ok_response(frame_body(rx))
}

/// Drive one request to completion: orchestrate, report any terminal error
/// as a single `{error}` frame, and close the stream on every exit path.
pub async fn run_chat_stream<B: ChatBackend>(
    backend: &B,
    messages: &[ChatMessage],
    emitter: &mut SseEmitter,
) {
    match orchestrate(backend, messages, emitter).await {
        Ok(()) => {}
        Err(ChatError::ClientGone) => {
            // The downstream client vanished; stop draining the upstream
            // instead of finishing into a dead channel.
            tracing::warn!("client disconnected mid-stream, aborting upstream read");
            return;
        }
        Err(err) => {
            tracing::error!(error = %err, "chat request failed");
            let _ = emitter
                .emit(&ChatFrame::Error {
                    message: err.to_string(),
                })
                .await;
        }
    }
    let _ = emitter.close().await;
}

/// The state machine: route on the latest message, dispatch to the backend
/// in the right mode, and emit frames for whichever branch was taken.
async fn orchestrate<B: ChatBackend>(
    backend: &B,
    messages: &[ChatMessage],
    emitter: &mut SseEmitter,
) -> Result<(), ChatError> {
    let current_turn = messages.last().map(|m| m.content.as_str()).unwrap_or("");

    if needs_chart_mode(current_turn) {
        tracing::info!("chart trigger matched, using tool-calling mode");
        let reply = backend
            .complete(messages, Some(vec![chart_tool_descriptor()]))
            .await?;
        match interpret_reply(reply)? {
            ReplyAction::Chart(artifact) => {
                tracing::info!("chart generated");
                emitter
                    .emit(&ChatFrame::Chart {
                        option: artifact.option,
                        description: artifact.description,
                    })
                    .await?;
                return Ok(());
            }
            ReplyAction::Text(content) => {
                emitter.emit(&ChatFrame::Text { content }).await?;
                return Ok(());
            }
            ReplyAction::Restream => {
                tracing::debug!("tool mode produced no output, re-issuing as plain stream");
            }
        }
    }

    // Per-chunk emission, no buffering across frames: arrival order is
    // preserved on the wire.
    let mut deltas = backend.stream(messages).await?;
    while let Some(delta) = deltas.next().await {
        emitter
            .emit(&ChatFrame::Text { content: delta? })
            .await?;
    }
    Ok(())
}

fn frame_body(rx: mpsc::Receiver<Bytes>) -> Body {
    Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    }))
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
