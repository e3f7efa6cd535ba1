//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap outbound connects and reads with a deadline
//! - Turn an elapsed deadline into a distinct `TimedOut` I/O error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the wrapped future is dropped on expiry
//! - Callers map `ErrorKind::TimedOut` to their own error kinds (e.g. 504)

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Run `fut`, failing with `ErrorKind::TimedOut` after `limit`.
pub async fn io_deadline<F, T>(limit: Duration, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {:?}", what, limit),
        )),
    }
}

/// Open a TCP connection to `addr` (a `host:port`, resolved here) within `limit`.
pub async fn connect_with_timeout(addr: &str, limit: Duration) -> io::Result<TcpStream> {
    let stream = io_deadline(limit, "connect", TcpStream::connect(addr)).await?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}
