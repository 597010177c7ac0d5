//! Connection loop for the callback endpoint.
//!
//! Each accepted connection runs on its own task with an abort handle
//! attached to every request it carries. Handlers use the handle to drop
//! the connection outright instead of answering, which is how oversized
//! notification bodies are dealt with.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handle that tears down the connection a request arrived on.
#[derive(Debug, Clone, Default)]
pub struct ConnectionAbort {
    token: CancellationToken,
}

impl ConnectionAbort {
    /// Create a handle for a fresh connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the connection without writing a response.
    ///
    /// Never resolves: the connection task is cancelled while this is
    /// pending, which discards the in-flight handler with it.
    pub async fn terminate(&self) -> Infallible {
        self.token.cancel();
        std::future::pending().await
    }

    /// Whether the connection has been torn down.
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn terminated(&self) {
        self.token.cancelled().await
    }
}

/// Connection counters for the callback listener.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicU64,
    terminated: AtomicU64,
}

impl ServerStats {
    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Connections dropped through a [`ConnectionAbort`].
    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }
}

/// Serve `router` on `listener` until `shutdown` fires.
///
/// Connections already in flight keep running on their own tasks.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Arc<ServerStats> {
    let stats = Arc::new(ServerStats::default());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                stats.connections.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(serve_connection(stream, peer, router.clone(), stats.clone()));
            }
            _ = shutdown.recv() => {
                tracing::info!(
                    connections = stats.connections(),
                    terminated = stats.terminated(),
                    "shutdown signal received, stopping callback listener"
                );
                return stats;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    stats: Arc<ServerStats>,
) {
    let abort = ConnectionAbort::new();

    let service = {
        let abort = abort.clone();
        hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
            let mut request: Request = request.map(Body::new);
            request.extensions_mut().insert(abort.clone());
            router.clone().oneshot(request)
        })
    };

    let builder = Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);

    tokio::select! {
        result = connection => {
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        }
        _ = abort.terminated() => {
            stats.terminated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%peer, "connection terminated");
        }
    }
}
