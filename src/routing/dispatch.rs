use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{chat, health};
use crate::state::AppState;

enum RouteMatch {
    Health,
    Chat,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let body_limit = state.config.server.body_limit_bytes;

    let response = match match_route(&parts.method, parts.uri.path()) {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Chat => {
            let body_bytes = match read_request_body(body, body_limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            chat::handler(State(state), body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response()
    })
}

fn match_route(method: &Method, path: &str) -> RouteMatch {
    match path {
        "/api/health" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/api/chat" => {
            if method == Method::POST {
                RouteMatch::Chat
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => RouteMatch::NotFound,
    }
}
