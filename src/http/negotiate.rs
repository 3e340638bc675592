//! Response delivery negotiation
//!
//! The JSON-RPC envelope is the same either way; only the framing changes.
//! A client that accepts `text/event-stream` gets successful replies to
//! requests as a single SSE `data:` event followed by end of stream.
//! Everything else is a buffered `application/json` body.

use std::convert::Infallible;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream;
use tracing::warn;

use crate::errors::RpcFault;
use crate::mcp::rpc::RpcResponse;

pub const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Buffered,
    SingleEvent,
}

pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(EVENT_STREAM))
}

/// Streams only when the client opted in, the request carried an id, and
/// the call succeeded.
pub fn choose_delivery(accepts_stream: bool, expects_reply: bool, succeeded: bool) -> DeliveryMode {
    if accepts_stream && expects_reply && succeeded {
        DeliveryMode::SingleEvent
    } else {
        DeliveryMode::Buffered
    }
}

pub fn negotiate(headers: &HeaderMap, response: &RpcResponse) -> DeliveryMode {
    choose_delivery(
        accepts_event_stream(headers),
        response.id().is_some(),
        response.is_success(),
    )
}

pub fn deliver(mode: DeliveryMode, response: RpcResponse) -> Response {
    match mode {
        DeliveryMode::Buffered => (StatusCode::OK, Json(response)).into_response(),
        DeliveryMode::SingleEvent => match Event::default().json_data(&response) {
            Ok(event) => {
                Sse::new(stream::iter([Ok::<_, Infallible>(event)])).into_response()
            }
            Err(err) => {
                warn!(error = %err, "failed to frame response as event, sending buffered");
                (StatusCode::OK, Json(response)).into_response()
            }
        },
    }
}

/// Transport-level failure: the body was not JSON at all.
pub fn parse_failure(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(RpcResponse::failure(None, &RpcFault::parse(message))),
    )
        .into_response()
}
