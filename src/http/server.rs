//! HTTP server and per-connection handler.
//!
//! # Responsibilities
//! - Run the accept loop on a bounded `Listener`
//! - Spawn one task per connection
//! - Per connection: parse a request, dispatch it to the service, finalize
//!   and write the response, repeat while keep-alive holds
//! - Contain failures: bad framing, handler errors and panics close only
//!   the connection they happened on
//!
//! # Design Decisions
//! - Generic over `Service` so the router-backed apps and the reverse proxy
//!   share this loop
//! - Idle connections are closed after `timeouts.idle_secs` and on shutdown
//! - Responses to HEAD keep their Content-Length but carry no body

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::http::codec::{self, Limits};
use crate::http::message::Method;
use crate::http::request::ensure_request_id;
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::listener::{Incoming, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{RequestContext, Service};

/// How long in-flight connections get to finish after shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Per-connection settings derived from config.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub limits: Limits,
    pub idle_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            limits: Limits::from(&config.limits),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
        }
    }
}

/// Accept loop plus connection handling for one service.
pub struct HttpServer {
    role: &'static str,
    service: Arc<dyn Service>,
    settings: ConnectionSettings,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// `role` labels logs and metrics (`backend`, `proxy`, `chat`).
    pub fn new(role: &'static str, service: Arc<dyn Service>, config: &AppConfig) -> Self {
        Self {
            role,
            service,
            settings: ConnectionSettings::from_config(config),
            tracker: ConnectionTracker::new(role),
        }
    }

    /// Tracker counting this server's open connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `shutdown` triggers, then give open connections a short
    /// grace period to finish.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();
        let addr = listener.local_addr().ok();

        tracing::info!(role = self.role, address = ?addr, "HTTP server starting");

        while !shutdown.is_triggered() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(Incoming { stream, peer_addr, slot }) => {
                        let guard = self.tracker.track();
                        let service = Arc::clone(&self.service);
                        let settings = self.settings;
                        let role = self.role;
                        let conn_shutdown = shutdown.subscribe();
                        tokio::spawn(async move {
                            let _slot = slot;
                            serve_connection(stream, peer_addr, guard.id(), role, service, settings, conn_shutdown).await;
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(role = self.role, error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = stop.recv() => {
                    tracing::info!(role = self.role, "Accept loop stopping");
                    break;
                }
            }
        }

        drop(listener);
        if !self.tracker.wait_idle(DRAIN_DEADLINE).await {
            tracing::warn!(
                role = self.role,
                remaining = self.tracker.active_count(),
                "Connections still open after drain deadline"
            );
        }
        tracing::info!(role = self.role, "HTTP server stopped");
    }
}

/// Handle one client connection until it closes.
pub async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: ConnectionId,
    role: &'static str,
    service: Arc<dyn Service>,
    settings: ConnectionSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, role, "Connection opened");

    loop {
        let parsed = tokio::select! {
            res = tokio::time::timeout(settings.idle_timeout, codec::parse_request(&mut reader, &settings.limits)) => res,
            _ = shutdown.recv() => {
                tracing::debug!(connection_id = %connection_id, "Closing connection for shutdown");
                break;
            }
        };

        let mut req = match parsed {
            Err(_) => {
                tracing::debug!(connection_id = %connection_id, "Idle timeout");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(req))) => req,
            Ok(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    peer_addr = %peer_addr,
                    kind = e.kind(),
                    error = %e,
                    "Rejecting request"
                );
                let mut resp = response::error(e.status(), &e.to_string());
                response::finalize(&mut resp, None, true);
                let _ = codec::write_message(&mut write_half, &resp).await;
                break;
            }
        };

        let start = Instant::now();
        let request_id = ensure_request_id(&mut req);
        let mut close = req.wants_close();
        let method = req.method().cloned().unwrap_or(Method::Get);
        let path = req.path().unwrap_or("/").to_string();

        let ctx = RequestContext {
            peer_addr,
            connection_id,
            request_id: request_id.clone(),
        };

        let outcome = AssertUnwindSafe(service.call(req, ctx)).catch_unwind().await;
        let mut resp = match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::error!(request_id = %request_id, method = %method, path = %path, error = %e, "Handler failed");
                close = true;
                response::error(500, "internal server error")
            }
            Err(_) => {
                tracing::error!(request_id = %request_id, method = %method, path = %path, "Handler panicked");
                close = true;
                response::error(500, "internal server error")
            }
        };

        close |= resp.headers.has_token("Connection", "close");
        response::finalize(&mut resp, Some(&request_id), close);
        if method == Method::Head {
            resp.body.clear();
        }

        let status = resp.status().unwrap_or(500);
        metrics::record_request(role, method.as_str(), status, start);
        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request handled"
        );

        if let Err(e) = codec::write_message(&mut write_half, &resp).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Write failed");
            break;
        }
        if close {
            break;
        }
    }

    let _ = write_half.shutdown().await;
    tracing::debug!(connection_id = %connection_id, "Connection finished");
}
