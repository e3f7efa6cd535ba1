//! Chat-app (client–server mode) subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request → app.rs (session check, parameter decoding)
//!     → registry.rs (single atomic step under one lock)
//!         → mailbox.rs (per-peer pending messages)
//!         → channel.rs (named history)
//!     → JSON envelope
//!
//! Background: idle-peer sweep, expired-session sweep
//! ```

pub mod app;
pub mod channel;
pub mod mailbox;
pub mod registry;

pub use app::{ApiError, ChatApp};
pub use channel::ChannelSummary;
pub use mailbox::{ChatMessage, Mailbox};
pub use registry::{Delivery, Peer, PeerRegistry, PeerStatus, ReadMode, RegistryError};
