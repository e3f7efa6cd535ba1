//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use sockstack::config::AppConfig;
use sockstack::http::HttpServer;
use sockstack::lifecycle::Shutdown;
use sockstack::net::Listener;
use sockstack::routing::Service;
use sockstack::{BackendApp, ChatApp, ReverseProxy};

/// A server running on an ephemeral port until `shutdown` fires.
pub struct Running {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Defaults with an ephemeral bind address and short timeouts.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.idle_secs = 5;
    config.timeouts.upstream_secs = 2;
    config.timeouts.connect_secs = 2;
    config.timeouts.handshake_secs = 2;
    config
}

pub async fn spawn_service(role: &'static str, service: Arc<dyn Service>, config: &AppConfig) -> Running {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(role, service, config);
    let stop = shutdown.clone();
    tokio::spawn(async move { server.run(listener, stop).await });
    Running { addr, shutdown }
}

pub async fn spawn_backend(config: &AppConfig) -> Running {
    let app = Arc::new(BackendApp::new(config));
    spawn_service("backend", Arc::new(app.router().unwrap()), config).await
}

pub async fn spawn_chat(config: &AppConfig) -> (Running, Arc<ChatApp>) {
    let app = Arc::new(ChatApp::new(config));
    let running = spawn_service("chat", Arc::new(app.router().unwrap()), config).await;
    (running, app)
}

/// Proxy in front of `upstream`.
pub async fn spawn_proxy(config: &AppConfig, upstream: SocketAddr) -> Running {
    let mut config = config.clone();
    config.proxy.upstream = upstream.to_string();
    spawn_service("proxy", Arc::new(ReverseProxy::new(&config)), &config).await
}

/// HTTP client that never goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// `SID=<token>` taken from a response's `Set-Cookie`.
pub fn sid_cookie(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with("SID=") && pair.len() > 4)
        .map(str::to_string)
}

/// Write raw bytes and read until the server closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// An upstream that answers every request with `response` and closes.
pub async fn start_fixed_upstream(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
