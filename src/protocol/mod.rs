//! Wire types for the inbound chat endpoint and the upstream
//! OpenAI-compatible chat-completion API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One turn of the conversation. Order is conversation order; the last
/// element is the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Upstream request
// ---------------------------------------------------------------------------

/// Chat-completion request body, buffered or streamed.
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [Value]>,
    /// `"auto"` whenever tools are advertised: the model decides whether
    /// to call one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
}

// ---------------------------------------------------------------------------
// Upstream buffered response
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// A structured function invocation from the model. `arguments` is a
/// string-encoded JSON object and needs a second parse step.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// What the model actually said, distilled from the first choice.
///
/// A tool call and accompanying text can both be present; the tool call
/// takes precedence for control purposes.
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_call: Option<FunctionCall>,
}

impl From<CompletionResponse> for AssistantReply {
    fn from(response: CompletionResponse) -> Self {
        let Some(choice) = response.choices.into_iter().next() else {
            return Self::default();
        };
        let message = choice.message;
        Self {
            content: message.content,
            tool_call: message
                .tool_calls
                .into_iter()
                .next()
                .map(|call| call.function),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream stream chunk
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Incremental text carried by this chunk, if any.
    #[must_use]
    pub fn into_content(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.delta.content)
    }
}
