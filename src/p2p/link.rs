//! A live connection to one remote node.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::observability::metrics;
use crate::p2p::frame::{encode_frame, Frame, FrameError};
use crate::resilience::timeouts::io_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connecting,
    Established,
    Closed,
}

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Snapshot of a link for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub peer_id: String,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    pub state: LinkState,
}

pub(crate) struct Link {
    pub(crate) peer_id: String,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) direction: Direction,
    state: Mutex<LinkState>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    write_timeout: Duration,
    guard: ConnectionGuard,
}

impl Link {
    pub(crate) fn new(
        peer_id: String,
        remote_addr: SocketAddr,
        direction: Direction,
        writer: OwnedWriteHalf,
        write_timeout: Duration,
        guard: ConnectionGuard,
    ) -> Self {
        Self {
            peer_id,
            remote_addr,
            direction,
            state: Mutex::new(LinkState::Established),
            writer: tokio::sync::Mutex::new(writer),
            write_timeout,
            guard,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn info(&self) -> LinkInfo {
        LinkInfo {
            peer_id: self.peer_id.clone(),
            remote_addr: self.remote_addr,
            direction: self.direction,
            state: self.state(),
        }
    }

    /// Write one frame. Fails without writing once the link is closed, and
    /// with `TimedOut` when the peer does not take the frame in time. Waiting
    /// for the writer counts against the same deadline.
    pub(crate) async fn send(&self, frame: &Frame) -> Result<(), FrameError> {
        if self.state() != LinkState::Established {
            return Err(FrameError::Io(io::Error::new(io::ErrorKind::NotConnected, "link closed")));
        }
        let line = encode_frame(frame)?;
        io_deadline(self.write_timeout, "p2p write", async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&line).await?;
            writer.flush().await
        })
        .await?;
        metrics::record_p2p_frame("sent");
        Ok(())
    }

    /// Mark closed and shut the write side down, optionally saying goodbye.
    /// Bounded by the write timeout, so a peer that stopped reading cannot
    /// hold it up.
    pub(crate) async fn close(&self, say_bye: bool) {
        if self.state() == LinkState::Closed {
            return;
        }
        self.set_state(LinkState::Closed);

        let bye = if say_bye { encode_frame(&Frame::Bye).ok() } else { None };
        let closed = io_deadline(self.write_timeout, "p2p close", async {
            let mut writer = self.writer.lock().await;
            if let Some(line) = &bye {
                writer.write_all(line).await?;
            }
            writer.shutdown().await
        })
        .await;
        match closed {
            Ok(()) => tracing::debug!(peer_id = %self.peer_id, link_id = %self.id(), "Link closed"),
            Err(e) => tracing::debug!(peer_id = %self.peer_id, link_id = %self.id(), error = %e, "Link closed uncleanly"),
        }
    }
}
