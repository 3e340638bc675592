use std::{sync::Arc, time::Instant};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method},
    middleware,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod mcp;
pub mod streams;
pub mod tools;

use config::Config;
use mcp::server::Dispatcher;
use streams::StreamRegistry;
use tools::ToolExecutor;

pub const MCP_ENDPOINT: &str = "/mcp";

/// Process-scoped state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub streams: StreamRegistry,
    pub started_at: Instant,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(executor: Arc<dyn ToolExecutor>, config: &Config) -> Self {
        Self {
            dispatcher: Dispatcher::new(executor),
            streams: StreamRegistry::new(config.keep_alive, config.stream_buffer),
            started_at: Instant::now(),
            port: config.port,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("last-event-id"),
        ])
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/", get(http::handlers::status_page))
        .route("/health", get(http::handlers::health))
        .route(
            MCP_ENDPOINT,
            get(http::handlers::mcp_stream).post(http::handlers::mcp_post),
        )
        .layer(body_limit)
        .layer(cors_layer())
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
