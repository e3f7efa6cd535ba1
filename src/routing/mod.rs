//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (exact (method, path) lookup, query ignored)
//!     → Handler, or a synthesized 404
//!
//! Route registration (at startup):
//!     RouterBuilder::route(...)*
//!     → reject duplicates and relative paths
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - No wildcard or regex matching
//! - Deterministic: same input always matches same route

pub mod router;

pub use router::{with_state, Handler, RequestContext, RouteError, Router, RouterBuilder, Service};
