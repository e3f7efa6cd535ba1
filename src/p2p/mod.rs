//! Peer-to-peer messaging subsystem.
//!
//! # Data Flow
//! ```text
//! connect(addr) → TCP → hello → hello_ack → link Established → reader task
//! inbound TCP   → hello → hello_ack → link Established → reader task
//!
//! send/broadcast → link writer → {"type":"message",...}
//! reader task    → inbox + live feed
//! shutdown       → bye on every link → close
//! ```
//!
//! # Design Decisions
//! - Newline-delimited JSON frames, at most 64 KiB each
//! - The tracker (a chat-app server) is optional; it only maps peer ids to addresses

pub mod console;
pub mod frame;
pub mod link;
pub mod node;
pub mod tracker;

pub use frame::Frame;
pub use link::{Direction, LinkInfo, LinkState};
pub use node::{InboundMessage, NodeState, P2pError, P2pNode};
pub use tracker::{TrackerClient, TrackerError, TrackerPeer};
