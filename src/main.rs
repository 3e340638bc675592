use std::sync::Arc;

use mcp_stream_gateway::{
    config::Config,
    lifecycle::{shutdown_signal, Server, ShutdownOutcome},
    logging,
    tools::builtin::BuiltinTools,
    AppState, MCP_ENDPOINT,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let state = AppState::new(Arc::new(BuiltinTools::new()), &config);
    let tool_count = state.dispatcher.tool_count();
    let server = Server::bind(&config, state).await?;

    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        endpoint = MCP_ENDPOINT,
        tools = tool_count,
        keep_alive_secs = config.keep_alive.as_secs(),
        "server starting"
    );

    match server.run_until(shutdown_signal()).await? {
        ShutdownOutcome::Graceful => Ok(()),
        ShutdownOutcome::Forced => {
            warn!("forced shutdown");
            std::process::exit(1);
        }
    }
}
