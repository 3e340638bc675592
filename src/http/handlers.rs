//! Axum HTTP handlers for the web server
//!
//! Provides the MCP endpoint (`POST` for calls, `GET` for standing streams),
//! the liveness probe, and the informational status page.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{sse::Sse, Html, IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::http::negotiate::{accepts_event_stream, deliver, negotiate, parse_failure};
use crate::mcp::server::SUPPORTED_PROTOCOL_VERSION;
use crate::streams::StreamError;
use crate::{AppState, MCP_ENDPOINT};

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub uptime: f64,
    pub protocol: String,
    pub endpoint: &'static str,
    pub tools: usize,
    pub streams: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs_f64(),
        protocol: protocol_label(),
        endpoint: MCP_ENDPOINT,
        tools: state.dispatcher.tool_count(),
        streams: state.streams.active_count(),
    })
}

pub async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // An unreadable or oversized body is a transport fault like bad JSON.
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(
                status = rejection.status().as_u16(),
                error = %rejection.body_text(),
                "unreadable json-rpc body"
            );
            return parse_failure(rejection.body_text());
        }
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "unparseable json-rpc body");
            return parse_failure(err.to_string());
        }
    };

    let response = state.dispatcher.dispatch_value(payload).await;
    let mode = negotiate(&headers, &response);
    deliver(mode, response)
}

pub async fn mcp_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match state
        .streams
        .open(accepts_event_stream(&headers), last_event_id)
    {
        Ok(stream) => (
            [
                (header::CACHE_CONTROL, "no-cache"),
                (X_ACCEL_BUFFERING, "no"),
            ],
            Sse::new(stream),
        )
            .into_response(),
        Err(err @ StreamError::NotAcceptable) => (
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method Not Allowed: {err}"),
        )
            .into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let endpoint_url = format!("http://localhost:{}{MCP_ENDPOINT}", state.port);
    let tools = state.dispatcher.tools();
    let tool_items = tools
        .iter()
        .map(|tool| {
            format!(
                "<li><code>{}</code> - {}</li>",
                escape_html(&tool.name),
                escape_html(tool.description.as_deref().unwrap_or(""))
            )
        })
        .collect::<String>();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>{name}</title>
  <style>
    body {{ font-family: sans-serif; margin: 40px; line-height: 1.6; }}
    code, pre {{ background: #f5f5f5; padding: 2px 6px; border-radius: 3px; }}
  </style>
</head>
<body>
  <h1>{name}</h1>
  <p><strong>Protocol:</strong> {protocol}</p>
  <p><strong>Endpoint:</strong> <code>{endpoint_url}</code></p>
  <ul>
    <li><strong>Version:</strong> {version}</li>
    <li><strong>Port:</strong> {port}</li>
    <li><strong>Available tools:</strong> {tool_count}</li>
    <li><strong>Open streams:</strong> {stream_count}</li>
  </ul>
  <h2>Endpoints</h2>
  <ul>
    <li><code>GET /</code> - this page</li>
    <li><code>GET /health</code> - health check</li>
    <li><code>POST {endpoint}</code> - JSON-RPC requests</li>
    <li><code>GET {endpoint}</code> - event stream for server-initiated messages</li>
  </ul>
  <h2>Tools</h2>
  <ul>{tool_items}</ul>
  <h2>Client configuration</h2>
  <pre>{{
  "mcpServers": {{
    "gateway": {{
      "transport": "http",
      "url": "{endpoint_url}"
    }}
  }}
}}</pre>
</body>
</html>
"#,
        name = env!("CARGO_PKG_NAME"),
        protocol = protocol_label(),
        version = env!("CARGO_PKG_VERSION"),
        port = state.port,
        tool_count = tools.len(),
        stream_count = state.streams.active_count(),
        endpoint = MCP_ENDPOINT,
    ))
}

fn protocol_label() -> String {
    format!("MCP HTTP Streamable ({SUPPORTED_PROTOCOL_VERSION})")
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_html;

    #[test]
    fn escapes_markup_in_tool_text() {
        assert_eq!(
            escape_html("<b>\"a\" & 'b'</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
    }
}
