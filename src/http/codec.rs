//! HTTP/1.x wire codec.
//!
//! # Responsibilities
//! - Parse one request (or response) from a buffered byte stream
//! - Enforce the header byte budget before anything is buffered unboundedly
//! - Read exactly `Content-Length` body bytes
//! - Serialize a `Message` deterministically
//!
//! # Design Decisions
//! - Only identity bodies: any other `Transfer-Encoding` is rejected
//! - Header lines are read through `take(budget)` so one huge line cannot
//!   grow the buffer past the limit
//! - Serialization emits headers verbatim; builders keep Content-Length right

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::LimitsConfig;
use crate::http::error::CodecError;
use crate::http::message::{is_token_byte, Headers, Message, Method, StartLine, Version};

/// Size limits applied while reading.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum bytes for the start line plus all header lines.
    pub max_header_bytes: usize,
    /// Maximum body size.
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Read one request.
///
/// Returns `Ok(None)` if the stream ends cleanly before the first byte,
/// which is how a keep-alive client says goodbye.
pub async fn parse_request<R>(reader: &mut R, limits: &Limits) -> Result<Option<Message>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let Some((line, headers)) = read_head(reader, limits).await? else {
        return Ok(None);
    };

    let start = parse_request_line(&line)?;
    let body = match request_body_length(&headers, limits)? {
        Some(len) => read_exact_body(reader, len).await?,
        None => Vec::new(),
    };

    Ok(Some(Message { start, headers, body }))
}

/// Read one response to a request made with `request_method`.
///
/// A response without `Content-Length` is delimited by the upstream closing
/// the connection.
pub async fn parse_response<R>(
    reader: &mut R,
    limits: &Limits,
    request_method: &Method,
) -> Result<Message, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let (line, headers) = read_head(reader, limits)
        .await?
        .ok_or(CodecError::UnexpectedEof)?;

    let (start, status) = parse_status_line(&line)?;

    reject_transfer_encoding(&headers)?;
    let bodiless = *request_method == Method::Head || (100..200).contains(&status) || status == 204 || status == 304;

    let body = if bodiless {
        Vec::new()
    } else {
        match content_length(&headers, limits)? {
            Some(len) => read_exact_body(reader, len).await?,
            None => read_until_close(reader, limits).await?,
        }
    };

    Ok(Message { start, headers, body })
}

/// Serialize a message: start line, headers in insertion order, blank line, body.
pub fn serialize(msg: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + msg.body.len());

    let start = match &msg.start {
        StartLine::Request { method, target, version } => format!("{} {} {}\r\n", method, target, version),
        StartLine::Response { version, status, reason } => format!("{} {} {}\r\n", version, status, reason),
    };
    out.extend_from_slice(start.as_bytes());

    for (name, value) in msg.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&msg.body);
    out
}

/// Serialize and write a message, then flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&serialize(msg)).await?;
    writer.flush().await
}

/// Read the start line and header block.
async fn read_head<R>(reader: &mut R, limits: &Limits) -> Result<Option<(String, Headers)>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = limits.max_header_bytes;
    let mut buf = Vec::with_capacity(256);

    // Tolerate empty lines ahead of the start line (RFC 7230 §3.5).
    let start_line = loop {
        if !read_line(reader, &mut buf, &mut budget, limits.max_header_bytes).await? {
            return if budget == limits.max_header_bytes {
                Ok(None)
            } else {
                Err(CodecError::UnexpectedEof)
            };
        }
        if !buf.is_empty() {
            break into_text(&buf, "start line")?;
        }
    };

    let mut headers = Headers::new();
    loop {
        if !read_line(reader, &mut buf, &mut budget, limits.max_header_bytes).await? {
            return Err(CodecError::UnexpectedEof);
        }
        if buf.is_empty() {
            break;
        }
        if buf[0] == b' ' || buf[0] == b'\t' {
            return Err(CodecError::malformed("obsolete header line folding"));
        }
        let line = into_text(&buf, "header line")?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::malformed(format!("header line without colon: {:?}", line)))?;
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(CodecError::malformed(format!("invalid header name: {:?}", name)));
        }
        headers.append(name, value.trim_matches(|c| c == ' ' || c == '\t'));
    }

    Ok(Some((start_line, headers)))
}

/// Read one line into `buf` without its terminator, charging `budget`.
/// Returns `false` on EOF before any byte of the line.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, budget: &mut usize, limit: usize) -> Result<bool, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(*budget as u64).read_until(b'\n', buf).await?;

    if buf.last() != Some(&b'\n') {
        if n == *budget {
            return Err(CodecError::HeaderTooLarge { limit });
        }
        if n == 0 {
            return Ok(false);
        }
        return Err(CodecError::UnexpectedEof);
    }

    *budget -= n;
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(true)
}

fn into_text(buf: &[u8], what: &str) -> Result<String, CodecError> {
    String::from_utf8(buf.to_vec()).map_err(|_| CodecError::malformed(format!("{} is not valid UTF-8", what)))
}

fn parse_request_line(line: &str) -> Result<StartLine, CodecError> {
    let parts: Vec<&str> = line.split(' ').collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(CodecError::malformed(format!("bad request line: {:?}", line)));
    };

    let method = Method::parse(method).ok_or_else(|| CodecError::malformed(format!("bad method: {:?}", method)))?;
    if target.is_empty() || target.chars().any(|c| c.is_control()) {
        return Err(CodecError::malformed(format!("bad request target: {:?}", target)));
    }
    let version = Version::parse(version).ok_or_else(|| CodecError::malformed(format!("unsupported version: {:?}", version)))?;

    Ok(StartLine::Request {
        method,
        target: target.to_string(),
        version,
    })
}

fn parse_status_line(line: &str) -> Result<(StartLine, u16), CodecError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .and_then(Version::parse)
        .ok_or_else(|| CodecError::malformed(format!("bad status line: {:?}", line)))?;
    let status = parts
        .next()
        .filter(|code| code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| CodecError::malformed(format!("bad status code in: {:?}", line)))?;
    let reason = parts.next().unwrap_or("").to_string();

    Ok((StartLine::Response { version, status, reason }, status))
}

fn reject_transfer_encoding(headers: &Headers) -> Result<(), CodecError> {
    for value in headers.get_all("Transfer-Encoding") {
        if value.split(',').any(|coding| !coding.trim().eq_ignore_ascii_case("identity")) {
            return Err(CodecError::UnsupportedEncoding(value.to_string()));
        }
    }
    Ok(())
}

/// Declared body length; duplicated values must agree.
fn content_length(headers: &Headers, limits: &Limits) -> Result<Option<usize>, CodecError> {
    let mut declared: Option<usize> = None;
    for value in headers.get_all("Content-Length") {
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CodecError::malformed(format!("invalid Content-Length: {:?}", value)));
            }
            let len: usize = item
                .parse()
                .map_err(|_| CodecError::malformed(format!("Content-Length out of range: {:?}", item)))?;
            match declared {
                Some(prev) if prev != len => {
                    return Err(CodecError::malformed("conflicting Content-Length values"));
                }
                _ => declared = Some(len),
            }
        }
    }

    if let Some(len) = declared {
        if len > limits.max_body_bytes {
            return Err(CodecError::BodyTooLarge {
                size: len,
                limit: limits.max_body_bytes,
            });
        }
    }
    Ok(declared)
}

fn request_body_length(headers: &Headers, limits: &Limits) -> Result<Option<usize>, CodecError> {
    reject_transfer_encoding(headers)?;
    content_length(headers, limits)
}

async fn read_exact_body<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(e)
        }
    })?;
    Ok(body)
}

async fn read_until_close<R>(reader: &mut R, limits: &Limits) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    (&mut *reader)
        .take(limits.max_body_bytes as u64 + 1)
        .read_to_end(&mut body)
        .await?;
    if body.len() > limits.max_body_bytes {
        return Err(CodecError::BodyTooLarge {
            size: body.len(),
            limit: limits.max_body_bytes,
        });
    }
    Ok(body)
}
