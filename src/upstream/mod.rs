//! Client for the upstream OpenAI-compatible chat-completion API.
//!
//! Pure protocol adapter: no retry and no business logic. Retry policy, if
//! any, belongs to the orchestrator (which currently defines none — a single
//! upstream failure ends the request).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::ChatError;
use crate::protocol::{
    AssistantReply, ChatMessage, CompletionRequest, CompletionResponse, StreamChunk,
};
use crate::stream::sse::{is_done, SseDecoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Seam between the orchestrator and the model provider, so tests can
/// substitute a double.
pub trait ChatBackend {
    /// Single buffered call; the full reply is surfaced so the caller can
    /// inspect it for a tool invocation.
    fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<Vec<Value>>,
    ) -> impl Future<Output = Result<AssistantReply, ChatError>> + Send;

    /// Chunked call yielding incremental text fragments in arrival order.
    fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<BoxStream<'static, Result<String, ChatError>>, ChatError>> + Send;
}

/// HTTP client for one configured upstream provider.
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Build the client with pooling and timeouts from server config.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the underlying HTTP client
    /// cannot be constructed.
    pub fn new(server: &ServerConfig, config: UpstreamConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(server.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| ChatError::Transport(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    /// Send one completion request and fail on a non-success status.
    async fn send_completion(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

impl ChatBackend for UpstreamClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<Vec<Value>>,
    ) -> Result<AssistantReply, ChatError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            stream: false,
            tools: tools.as_deref(),
            tool_choice: tools.is_some().then_some("auto"),
        };
        let response = self.send_completion(&request).await?;
        let parsed: CompletionResponse = response.json().await.map_err(|err| {
            ChatError::Transport(format!("Failed to decode upstream response: {err}"))
        })?;
        Ok(AssistantReply::from(parsed))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String, ChatError>>, ChatError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            stream: true,
            tools: None,
            tool_choice: None,
        };
        let response = self.send_completion(&request).await?;
        Ok(delta_stream(response.bytes_stream()).boxed())
    }
}

struct DeltaState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    payloads: VecDeque<String>,
    finished: bool,
}

/// Decode an upstream SSE body into a stream of text deltas.
///
/// Frame payloads that fail to parse are logged and skipped — a single
/// malformed chunk must not abort the stream. A body-level read error is
/// terminal and surfaced as the final `Err` item. Decoding stops at the
/// upstream `[DONE]` sentinel.
pub fn delta_stream<S, E>(body: S) -> impl Stream<Item = Result<String, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DeltaState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        payloads: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            while let Some(payload) = state.payloads.pop_front() {
                if is_done(&payload) {
                    state.finished = true;
                    return None;
                }
                match serde_json::from_str::<StreamChunk>(&payload) {
                    Ok(chunk) => {
                        if let Some(content) = chunk.into_content() {
                            if !content.is_empty() {
                                return Some((Ok(content), state));
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed stream frame");
                    }
                }
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let mut decoded = Vec::new();
                    state.decoder.feed(&chunk, &mut decoded);
                    state.payloads.extend(decoded);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((
                        Err(ChatError::Transport(format!("upstream stream error: {err}"))),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn byte_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    async fn collect_deltas(
        chunks: Vec<&'static [u8]>,
    ) -> Vec<Result<String, ChatError>> {
        delta_stream(byte_stream(chunks)).collect().await
    }

    #[tokio::test]
    async fn test_deltas_in_arrival_order() {
        let deltas = collect_deltas(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        let texts: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["He", "llo"]);
        assert_eq!(texts.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_frame_split_across_chunk_boundary() {
        // The data: line is cut mid-JSON; the decoder must reassemble it
        // into exactly one delta.
        let deltas = collect_deltas(vec![
            b"data: {\"choices\":[{\"delta\":{\"con",
            b"tent\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        let texts: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped_not_fatal() {
        let deltas = collect_deltas(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            b"data: {nonsense}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        let texts: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_done_sentinel_stops_decoding() {
        let deltas = collect_deltas(vec![
            b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])
        .await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_roleonly_deltas_are_dropped() {
        let deltas = collect_deltas(vec![
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        let texts: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["x"]);
    }

    #[tokio::test]
    async fn test_body_read_error_is_terminal() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            )),
            Err("connection reset"),
        ]);
        let deltas: Vec<Result<String, ChatError>> = delta_stream(source).collect().await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].as_deref().unwrap(), "a");
        assert!(matches!(deltas[1], Err(ChatError::Transport(_))));
    }
}
