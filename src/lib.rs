//! Socket-level HTTP and chat stack.
//!
//! Four roles share one codec, one server loop and one configuration file:
//! a session-protected backend, a reverse proxy in front of it, a chat
//! tracker with peer registry and mailboxes, and a peer-to-peer node that
//! links directly to other nodes.

pub mod backend;
pub mod chat;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod p2p;
pub mod proxy;
pub mod resilience;
pub mod routing;
pub mod session;

pub use backend::BackendApp;
pub use chat::ChatApp;
pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use p2p::P2pNode;
pub use proxy::ReverseProxy;
