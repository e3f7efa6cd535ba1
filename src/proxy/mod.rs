//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Client request (via the shared connection handler)
//!     → forward.rs (strip hop-by-hop, rewrite Host, X-Forwarded-For)
//!     → upstream.rs (pooled or fresh connection, write, parse response)
//!     → forward.rs (strip hop-by-hop) → client
//!
//! Upstream failure:
//!     unreachable / closed / malformed → 502
//!     no answer in time                → 504
//! ```

pub mod forward;
pub mod upstream;

pub use forward::ReverseProxy;
pub use upstream::{ProxyError, Upstream};
