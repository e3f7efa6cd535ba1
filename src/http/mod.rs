//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one task per connection)
//!     → codec.rs (parse one request within the header/body limits)
//!     → request.rs (request ID, cookies, query and body parameters)
//!     → Service (router or reverse proxy)
//!     → response.rs (finalize: length, content type, request ID)
//!     → codec.rs (serialize) → client
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod request;
pub mod response;
pub mod server;

pub use error::{CodecError, HandlerError};
pub use message::{Headers, Message, Method, StartLine, Version};
pub use request::{RequestId, X_REQUEST_ID};
pub use server::HttpServer;
