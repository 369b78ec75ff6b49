use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Invalid chart arguments: {0}")]
    ToolArguments(String),
    #[error("client disconnected")]
    ClientGone,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// HTTP status for errors surfaced before the SSE stream is opened.
    ///
    /// Once streaming has started the status line is already on the wire;
    /// later errors are reported as an in-stream `{error}` frame instead.
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            ChatError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            ChatError::Upstream { .. } | ChatError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            ChatError::ToolArguments(_) | ChatError::ClientGone | ChatError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_maps_to_400() {
        let err = ChatError::InvalidRequest("messages must be an array".to_string());
        assert_eq!(err.http_status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_maps_to_502() {
        let err = ChatError::Upstream {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.http_status(), http::StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("status=503"));
    }

    #[test]
    fn test_tool_arguments_display_is_short() {
        let err = ChatError::ToolArguments("seriesData must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid chart arguments: seriesData must not be empty"
        );
    }
}
