//! HTTP server implementation.

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MirrorviewError, Result};

/// HTTP server for the MirrorView API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The application router
    app: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, app: Router) -> Self {
        Self { addr, app }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            MirrorviewError::Io(e)
        })?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            MirrorviewError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::http::{app, cors_layer, AdmissionMiddleware, AppState};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let admission =
            Arc::new(AdmissionMiddleware::from_config(&AdmissionConfig::default()).unwrap());
        let router = app(AppState::default(), admission, cors_layer(&[]));

        let server = HttpServer::new(addr, router);
        tokio_test::assert_ok!(server.serve_with_shutdown(async {}).await);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap();

        let server = HttpServer::new(taken, Router::new());
        let result = server.serve_with_shutdown(async {}).await;
        assert!(matches!(result, Err(MirrorviewError::Io(_))));
    }
}
