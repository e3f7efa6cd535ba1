//! Upstream connection management.
//!
//! # Responsibilities
//! - Open connections to the configured backend within the connect timeout
//! - Send one request and read its response within the upstream timeout
//! - Keep a bounded pool of idle keep-alive connections for reuse
//!
//! # Design Decisions
//! - A reused connection that turns out to be dead is retried once on a
//!   fresh connection; a fresh connection is never retried
//! - The pool lock is never held across an await

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::AppConfig;
use crate::http::codec::{self, Limits};
use crate::http::error::CodecError;
use crate::http::message::{Message, Method};
use crate::resilience::timeouts::{connect_with_timeout, io_deadline};

/// Failure talking to the upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {addr} unreachable: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("upstream closed the connection before responding")]
    Closed,

    #[error("malformed upstream response: {0}")]
    BadResponse(String),

    #[error("upstream I/O error: {0}")]
    Io(io::Error),
}

impl ProxyError {
    /// Status returned to the client.
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::Timeout(_) => 504,
            _ => 502,
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Connect { .. } => "connect",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Closed => "closed",
            ProxyError::BadResponse(_) => "malformed",
            ProxyError::Io(_) => "io",
        }
    }

    /// Failures that suggest a stale pooled connection.
    fn is_stale(&self) -> bool {
        matches!(self, ProxyError::Closed | ProxyError::Io(_))
    }
}

struct UpstreamConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A single backend plus its idle connection pool.
pub struct Upstream {
    addr: String,
    idle: Mutex<Vec<UpstreamConn>>,
    max_idle: usize,
    connect_timeout: Duration,
    response_timeout: Duration,
    limits: Limits,
}

impl Upstream {
    pub fn new(addr: impl Into<String>, config: &AppConfig) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
            max_idle: config.proxy.max_idle_connections,
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            response_timeout: Duration::from_secs(config.timeouts.upstream_secs),
            limits: Limits::from(&config.limits),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of idle pooled connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Send `req` and return the upstream's response.
    pub async fn exchange(&self, req: &Message) -> Result<Message, ProxyError> {
        let method = req.method().cloned().unwrap_or(Method::Get);

        if let Some(conn) = self.checkout() {
            match self.exchange_on(conn, req, &method).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_stale() => {
                    tracing::debug!(upstream = %self.addr, error = %e, "Pooled connection was stale, retrying on a fresh one");
                }
                Err(e) => return Err(e),
            }
        }

        let conn = self.connect().await?;
        self.exchange_on(conn, req, &method).await
    }

    async fn connect(&self) -> Result<UpstreamConn, ProxyError> {
        let stream = connect_with_timeout(&self.addr, self.connect_timeout)
            .await
            .map_err(|source| ProxyError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read_half, writer) = stream.into_split();
        tracing::debug!(upstream = %self.addr, "Upstream connection opened");
        Ok(UpstreamConn {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    async fn exchange_on(&self, mut conn: UpstreamConn, req: &Message, method: &Method) -> Result<Message, ProxyError> {
        io_deadline(self.response_timeout, "upstream write", codec::write_message(&mut conn.writer, req))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut => ProxyError::Timeout(e.to_string()),
                _ => ProxyError::Io(e),
            })?;

        let parsed = tokio::time::timeout(
            self.response_timeout,
            codec::parse_response(&mut conn.reader, &self.limits, method),
        )
        .await;

        let resp = match parsed {
            Err(_) => {
                return Err(ProxyError::Timeout(format!(
                    "no response within {:?}",
                    self.response_timeout
                )))
            }
            Ok(Err(CodecError::UnexpectedEof)) => return Err(ProxyError::Closed),
            Ok(Err(CodecError::Io(e))) => return Err(ProxyError::Io(e)),
            Ok(Err(e)) => return Err(ProxyError::BadResponse(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        if reusable(req, &resp, method) {
            self.checkin(conn);
        }
        Ok(resp)
    }

    fn checkout(&self) -> Option<UpstreamConn> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn checkin(&self, conn: UpstreamConn) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// Whether the connection is positioned at the next response boundary and
/// the upstream agreed to keep it open.
fn reusable(req: &Message, resp: &Message, method: &Method) -> bool {
    if req.wants_close() || resp.wants_close() {
        return false;
    }
    let status = resp.status().unwrap_or(0);
    let bodiless = *method == Method::Head || (100..200).contains(&status) || status == 204 || status == 304;
    bodiless || resp.headers.contains("Content-Length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Keep-alive upstream answering every request with "hi"; counts accepted sockets.
    async fn keep_alive_upstream() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (r, mut w) = socket.into_split();
                    let mut r = BufReader::new(r);
                    loop {
                        let mut line = String::new();
                        if r.read_line(&mut line).await.unwrap_or(0) == 0 {
                            break;
                        }
                        if line == "\r\n" {
                            if w.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        (addr, accepted)
    }

    /// Upstream that answers one request per connection without asking
    /// for close, then drops the socket anyway.
    async fn one_shot_upstream() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (r, mut w) = socket.into_split();
                    let mut r = BufReader::new(r);
                    loop {
                        let mut line = String::new();
                        if r.read_line(&mut line).await.unwrap_or(0) == 0 || line == "\r\n" {
                            break;
                        }
                    }
                    let _ = w.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await;
                });
            }
        });
        (addr, accepted)
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.timeouts.connect_secs = 1;
        config.timeouts.upstream_secs = 1;
        config
    }

    #[tokio::test]
    async fn keep_alive_connection_is_reused() {
        let (addr, accepted) = keep_alive_upstream().await;
        let upstream = Upstream::new(addr, &config());
        let req = Message::request(Method::Get, "/");

        let first = upstream.exchange(&req).await.unwrap();
        assert_eq!(first.body, b"hi");
        assert_eq!(upstream.idle_count(), 1);

        let second = upstream.exchange(&req).await.unwrap();
        assert_eq!(second.body, b"hi");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pooled_connection_closed_by_upstream_is_retried_fresh() {
        let (addr, accepted) = one_shot_upstream().await;
        let upstream = Upstream::new(addr, &config());
        let req = Message::request(Method::Get, "/");

        assert_eq!(upstream.exchange(&req).await.unwrap().body, b"hi");
        assert_eq!(upstream.idle_count(), 1);
        // Let the upstream's close reach the pooled socket.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = upstream.exchange(&req).await.unwrap();
        assert_eq!(second.body, b"hi");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let upstream = Upstream::new(addr, &config());
        let err = upstream.exchange(&Message::request(Method::Get, "/")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Connect { .. }));
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn silent_upstream_is_504() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
        });

        let upstream = Upstream::new(addr, &config());
        let err = upstream.exchange(&Message::request(Method::Get, "/")).await.unwrap_err();
        assert_eq!(err.status(), 504);
    }

    #[tokio::test]
    async fn garbage_response_is_bad_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"this is not http\r\n\r\n").await;
        });

        let upstream = Upstream::new(addr, &config());
        let err = upstream.exchange(&Message::request(Method::Get, "/")).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadResponse(_)));
        assert_eq!(err.status(), 502);
    }
}
