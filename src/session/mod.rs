//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! POST /login (credentials)
//!     → auth.rs (Authenticator decides)
//!     → store.rs (issue token) → Set-Cookie: SID=<token>
//!
//! Protected request (Cookie: SID=<token>)
//!     → auth.rs (require_session) → store.rs (validate) → user | 401
//! ```

pub mod auth;
pub mod store;

pub use auth::{require_session, Authenticator, OpenCredentials, StaticCredentials, Unauthorized};
pub use store::{Session, SessionStore};
