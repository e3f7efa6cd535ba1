//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound operation (upstream connect/read, P2P connect/handshake)
//!     → timeouts.rs (deadline)
//!     → Success | TimedOut error surfaced to the caller
//! ```
//!
//! # Design Decisions
//! - No retries at this layer; the proxy retries a stale pooled connection once
//! - A timeout never affects anything but the operation it wraps

pub mod timeouts;
