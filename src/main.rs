//! sockstack: backend, reverse proxy, chat tracker and P2P node.
//!
//! ```text
//!   browser ──▶ proxy ──▶ backend          (login, index, echo)
//!
//!   peer A ──▶ chat tracker ◀── peer B     (registry, mailboxes, channels)
//!   peer A ◀══════ P2P link ═════▶ peer B   (direct JSON-lines frames)
//! ```
//!
//! Every role reads the same TOML file; flags override single fields and
//! the result is validated again before anything binds.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use sockstack::config::loader::{load_config, ConfigError};
use sockstack::config::validation::validate_config;
use sockstack::config::AppConfig;
use sockstack::http::HttpServer;
use sockstack::lifecycle::signals::spawn_signal_handler;
use sockstack::lifecycle::Shutdown;
use sockstack::net::Listener;
use sockstack::observability::{logging, metrics};
use sockstack::p2p::console::{spawn_feed_printer, Console};
use sockstack::p2p::{P2pNode, TrackerClient};
use sockstack::routing::Service;
use sockstack::{BackendApp, ChatApp, ReverseProxy};

#[derive(Parser)]
#[command(name = "sockstack", version)]
#[command(about = "Socket-level HTTP backend, reverse proxy, chat tracker and P2P node", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Serve the login/echo backend
    Backend,
    /// Relay requests to an upstream server
    Proxy {
        /// Override `proxy.upstream` (host:port).
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Serve the chat-app tracker API
    Chat,
    /// Run an interactive P2P node
    P2p {
        #[arg(long)]
        peer_id: Option<String>,

        /// Port for inbound links; keeps the configured listen host.
        #[arg(long)]
        listen_port: Option<u16>,

        /// Tracker base URL, e.g. http://127.0.0.1:8001
        #[arg(long)]
        tracker: Option<String>,
    },
}

impl Cli {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        match &self.role {
            Role::Proxy { upstream: Some(upstream) } => config.proxy.upstream = upstream.clone(),
            Role::P2p {
                peer_id,
                listen_port,
                tracker,
            } => {
                if let Some(id) = peer_id {
                    config.p2p.peer_id = id.clone();
                }
                if let Some(port) = listen_port {
                    let host = config
                        .p2p
                        .listen_address
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| "0.0.0.0".to_string());
                    config.p2p.listen_address = format!("{}:{}", host, port);
                }
                if tracker.is_some() {
                    config.p2p.tracker_url = tracker.clone();
                }
            }
            _ => {}
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sockstack starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    match cli.role {
        Role::Backend => {
            let app = Arc::new(BackendApp::new(&config));
            app.spawn_maintenance(&shutdown);
            serve("backend", Arc::new(app.router()?), &config, shutdown).await?;
        }
        Role::Proxy { .. } => {
            tracing::info!(upstream = %config.proxy.upstream, "Proxy upstream configured");
            serve("proxy", Arc::new(ReverseProxy::new(&config)), &config, shutdown).await?;
        }
        Role::Chat => {
            let app = Arc::new(ChatApp::new(&config));
            app.spawn_maintenance(&shutdown);
            serve("chat", Arc::new(app.router()?), &config, shutdown).await?;
        }
        Role::P2p { .. } => run_node(&config, shutdown).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve(
    role: &'static str,
    service: Arc<dyn Service>,
    config: &AppConfig,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::bind(&config.listener).await?;
    tracing::info!(
        role,
        address = %listener.local_addr()?,
        max_connections = listener.max_connections(),
        "Listening for connections"
    );
    HttpServer::new(role, service, config).run(listener, shutdown).await;
    Ok(())
}

async fn run_node(config: &AppConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let node = P2pNode::with_inbox_capacity(config.p2p.peer_id.clone(), &config.timeouts, config.p2p.inbox_capacity);
    let local = node.listen(&config.p2p.listen_address).await?;
    println!("peer {} listening on {}", node.peer_id(), local);

    let tracker = match &config.p2p.tracker_url {
        Some(url) => {
            let mut client = TrackerClient::new(url)?;
            client
                .login(&config.p2p.tracker_user, &config.p2p.tracker_password)
                .await?;
            client.submit_info(node.peer_id(), None, local.port()).await?;
            tracing::info!(tracker = %url, "Announced to tracker");
            Some(client)
        }
        None => None,
    };

    let _feed = spawn_feed_printer(&node);
    let console = Console::new(node.clone(), tracker);
    let mut stdout = tokio::io::stdout();
    let mut stop = shutdown.subscribe();

    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin()), &mut stdout) => result?,
        _ = stop.recv() => {}
    }

    node.shutdown().await;
    Ok(())
}
