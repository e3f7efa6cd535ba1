//! Bounded TCP accept.
//!
//! Every accepted socket holds a connection slot until its task ends; with
//! all `max_connections` slots taken, `accept` parks instead of letting the
//! kernel backlog drain into unbounded tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The slot semaphore was closed; no further connections will be accepted.
    #[error("listener closed")]
    Closed,
}

/// An accepted socket together with the slot it occupies.
#[derive(Debug)]
pub struct Incoming {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub slot: ConnectionSlot,
}

pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source: std::io::Error| ListenerError::Bind {
            addr: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        tracing::info!(
            address = %socket.local_addr().map_err(bind_error)?,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then for the next connection.
    pub async fn accept(&self) -> Result<Incoming, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer_addr) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer_addr, error = %e, "TCP_NODELAY not set");
        }
        tracing::debug!(peer_addr = %peer_addr, free_slots = self.slots.available_permits(), "Connection accepted");

        Ok(Incoming {
            stream,
            peer_addr,
            slot: ConnectionSlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One of the listener's `max_connections` slots; released on drop,
/// including when the connection task panics.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}
