//! Startup binding and bounded graceful shutdown.

use std::{
    future::{Future, IntoFuture},
    net::SocketAddr,
    time::Duration,
};

use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};

use crate::{build_app, config::Config, errors::ServerError, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the grace period.
    Graceful,
    /// The grace period elapsed with connections still open.
    Forced,
}

pub struct Server {
    listener: TcpListener,
    state: AppState,
    shutdown_grace: Duration,
}

impl Server {
    pub async fn bind(config: &Config, state: AppState) -> Result<Self, ServerError> {
        let socket = config.bind_socket()?;
        let listener = TcpListener::bind(socket).await.map_err(ServerError::Bind)?;

        Ok(Self {
            listener,
            state,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Bind)
    }

    /// Serves until `signal` resolves, then closes every standing stream and
    /// waits at most the grace period for the listener to finish.
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownOutcome, ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            state,
            shutdown_grace,
        } = self;

        let streams = state.streams.clone();
        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let drain = async move {
            signal.await;
            let closed = streams.shutdown();
            info!(closed_streams = closed, "shutting down, closed standing streams");
            let _ = draining_tx.send(());
        };

        let app = build_app(state);
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(drain)
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                result.map_err(ServerError::Serve)?;
                info!("server closed");
                return Ok(ShutdownOutcome::Graceful);
            }
            _ = draining_rx => {}
        }

        match tokio::time::timeout(shutdown_grace, &mut server).await {
            Ok(result) => {
                result.map_err(ServerError::Serve)?;
                info!("server closed");
                Ok(ShutdownOutcome::Graceful)
            }
            Err(_) => {
                warn!(
                    grace_ms = u64::try_from(shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                    "connections still open after grace period, forcing shutdown"
                );
                Ok(ShutdownOutcome::Forced)
            }
        }
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
