//! Wire-level error types.

use thiserror::Error;

/// Failure while reading or parsing a message off the wire.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bad start line, header line, or body framing.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// `Transfer-Encoding` other than identity was declared.
    #[error("unsupported transfer encoding: {0}")]
    UnsupportedEncoding(String),

    /// Header block exceeded the configured byte budget.
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// Declared or streamed body exceeded the configured limit.
    #[error("body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    /// Peer closed the stream part-way through a message.
    #[error("connection closed mid-message")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Status code a server answers with when a request fails this way.
    pub fn status(&self) -> u16 {
        match self {
            CodecError::Malformed(_) | CodecError::UnexpectedEof | CodecError::Io(_) => 400,
            CodecError::UnsupportedEncoding(_) => 501,
            CodecError::HeaderTooLarge { .. } => 431,
            CodecError::BodyTooLarge { .. } => 413,
        }
    }

    /// Short machine-readable kind used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::Malformed(_) | CodecError::UnexpectedEof | CodecError::Io(_) => "MalformedRequest",
            CodecError::UnsupportedEncoding(_) => "UnsupportedEncoding",
            CodecError::HeaderTooLarge { .. } => "HeaderTooLarge",
            CodecError::BodyTooLarge { .. } => "BodyTooLarge",
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        CodecError::Malformed(msg.into())
    }
}

/// Failure raised by a request handler itself (not an application-level
/// error response). The connection answers 500 and is closed.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("internal handler failure: {0}")]
    Internal(String),

    #[error("handler panicked")]
    Panicked,
}

impl HandlerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        HandlerError::Internal(msg.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Internal(format!("json encoding failed: {}", e))
    }
}
