//! HTTP front end.
//!
//! A single route answers GET and POST on `/`. Parameters come from the
//! query string and from a url-encoded body; the engine runs on the
//! blocking pool because every host call is synchronous.

mod handler;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub use handler::{handle, into_http_response, parse_form, request_params};

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Builds the router.
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/", get(handler::handle).post(handler::handle))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

/// Running HTTP server.
pub struct UpdateServer {
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    addr: SocketAddr,
}

impl UpdateServer {
    /// Binds `addr` and serves requests in a background task.
    ///
    /// # Errors
    /// Returns error if the address cannot be bound.
    pub async fn start(engine: Arc<Engine>, addr: SocketAddr) -> std::io::Result<Self> {
        let router = create_router(engine);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_addr = listener.local_addr()?;

        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });

            if let Err(e) = server.await {
                tracing::error!("[SERVER] Server error: {}", e);
            }
        });

        tracing::info!("[SERVER] Listening on http://{}", actual_addr);

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            addr: actual_addr,
        })
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Stops accepting requests.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("[SERVER] Shutdown requested");
        }
    }
}

impl Drop for UpdateServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
