//! The single writer of the outbound event stream.

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::stream::sse::{data_frame, DONE_FRAME};

/// One outbound frame, before encoding.
#[derive(Debug, Clone)]
pub enum ChatFrame {
    Text { content: String },
    Chart { option: Value, description: String },
    Error { message: String },
}

impl ChatFrame {
    /// JSON payload carried in the frame's `data:` line.
    #[must_use]
    pub fn to_json(&self) -> String {
        match self {
            ChatFrame::Text { content } => json!({ "content": content }).to_string(),
            ChatFrame::Chart {
                option,
                description,
            } => json!({
                "type": "chart",
                "chartOption": option,
                "description": description,
            })
            .to_string(),
            ChatFrame::Error { message } => json!({ "error": message }).to_string(),
        }
    }
}

/// Owns the outbound byte stream for one request.
///
/// Frames go out strictly in emit order; [`SseEmitter::close`] appends the
/// terminal `[DONE]` frame and must be called exactly once per request on
/// every exit path. A failed send means the downstream client disconnected,
/// surfaced as [`ChatError::ClientGone`] so the caller stops draining the
/// upstream.
pub struct SseEmitter {
    tx: mpsc::Sender<Bytes>,
    closed: bool,
}

impl SseEmitter {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx, closed: false }
    }

    /// Append one encoded frame.
    ///
    /// Emitting after close is a programming error: it panics in debug
    /// builds and is a silent no-op in release builds.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ClientGone`] when the client has disconnected.
    pub async fn emit(&mut self, frame: &ChatFrame) -> Result<(), ChatError> {
        debug_assert!(!self.closed, "emit called after close");
        if self.closed {
            return Ok(());
        }
        self.send(data_frame(&frame.to_json())).await
    }

    /// Append the terminal frame and seal the stream. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ClientGone`] when the client has disconnected.
    pub async fn close(&mut self) -> Result<(), ChatError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send(DONE_FRAME.to_string()).await
    }

    async fn send(&self, encoded: String) -> Result<(), ChatError> {
        self.tx
            .send(Bytes::from(encoded))
            .await
            .map_err(|_| ChatError::ClientGone)
    }
}
