//! Response construction and finalization.
//!
//! # Responsibilities
//! - Build text, HTML and JSON responses with Content-Type/Content-Length
//! - Build the error envelopes used by the apps and the connection handler
//! - Finalize every outgoing response (length, default type, request ID)
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped whenever a message crosses the proxy
//! - Error bodies from the connection handler are plain text

use serde::Serialize;
use serde_json::json;

use crate::http::error::HandlerError;
use crate::http::message::Message;
use crate::http::request::{RequestId, X_REQUEST_ID};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json";

/// Headers that only apply to a single transport hop.
pub const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

pub fn text(status: u16, body: impl Into<String>) -> Message {
    Message::response(status).with_body(TEXT_PLAIN, body.into())
}

pub fn html(status: u16, body: impl Into<String>) -> Message {
    Message::response(status).with_body(TEXT_HTML, body.into())
}

/// Serialize `value` as the JSON body of a response.
pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Message, HandlerError> {
    let body = serde_json::to_vec(value)?;
    Ok(Message::response(status).with_body(APPLICATION_JSON, body))
}

/// `{"status":"error","error":kind,"message":message}`.
pub fn json_error(status: u16, kind: &str, message: impl Into<String>) -> Message {
    let body = json!({
        "status": "error",
        "error": kind,
        "message": message.into(),
    });
    Message::response(status).with_body(APPLICATION_JSON, body.to_string())
}

/// Plain-text error used by the connection handler itself.
pub fn error(status: u16, detail: &str) -> Message {
    let reason = crate::http::message::reason_phrase(status);
    text(status, format!("{} {}\n{}\n", status, reason, detail))
}

/// Synthesized response for an unmatched route.
pub fn not_found(path: &str) -> Message {
    error(404, &format!("no route for {}", path))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(msg: &mut Message) {
    let named: Vec<String> = msg
        .headers
        .get_all("Connection")
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        msg.headers.remove(name);
    }
}

/// Prepare a response for the wire.
///
/// Forces `Content-Length` to the real body length, adds a default
/// `Content-Type`, echoes the request ID, and marks `Connection: close`
/// when the connection is about to be closed.
pub fn finalize(resp: &mut Message, request_id: Option<&RequestId>, close: bool) {
    let body = std::mem::take(&mut resp.body);
    resp.set_body(body);
    if !resp.headers.contains("Content-Type") {
        resp.headers.insert("Content-Type", TEXT_PLAIN);
    }
    if let Some(id) = request_id {
        resp.headers.insert(X_REQUEST_ID, id.as_str());
    }
    if close {
        resp.headers.insert("Connection", "close");
    }
}
