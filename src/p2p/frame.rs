//! Link wire format: one JSON object per line.
//!
//! ```text
//! {"type":"hello","peer_id":"a","listen_port":5000}
//! {"type":"hello_ack","peer_id":"b"}
//! {"type":"message","from":"a","message":"hi","timestamp":1700000000000}
//! {"type":"bye"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame, newline included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello { peer_id: String, listen_port: u16 },
    HelloAck { peer_id: String },
    Message { from: String, message: String, timestamp: u64 },
    Bye,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("stream ended mid-frame")]
    Truncated,

    #[error("invalid frame: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the next frame. `Ok(None)` means the peer closed the stream cleanly.
/// Blank lines are skipped.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut *reader)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            return Err(if buf.len() > MAX_FRAME_BYTES {
                FrameError::TooLarge { limit: MAX_FRAME_BYTES }
            } else {
                FrameError::Truncated
            });
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(Some(serde_json::from_slice(&buf)?));
    }
}

/// Serialize `frame` as one newline-terminated line, enforcing the size limit.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let mut line = serde_json::to_vec(frame)?;
    if line.len() + 1 > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { limit: MAX_FRAME_BYTES });
    }
    line.push(b'\n');
    Ok(line)
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_frame(frame)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
