//! Request inspection helpers.
//!
//! # Responsibilities
//! - Attach a unique request ID (UUID v4) as early as possible
//! - Parse cookies, query strings, and form/JSON bodies into flat parameters
//!
//! # Design Decisions
//! - An incoming `X-Request-ID` is trusted and propagated unchanged
//! - Body format is selected by `Content-Type`; an untyped body that looks
//!   like a JSON object is treated as JSON

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::http::message::Message;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "X-Request-ID";

/// A request ID (UUID v4 unless the client supplied one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Return the request's ID, generating and inserting one if absent.
pub fn ensure_request_id(req: &mut Message) -> RequestId {
    if let Some(existing) = req.headers.get(X_REQUEST_ID).filter(|v| !v.trim().is_empty()) {
        return RequestId(existing.trim().to_string());
    }
    let id = RequestId::generate();
    req.headers.append(X_REQUEST_ID, id.as_str());
    id
}

/// All cookies from every `Cookie` header, in order.
pub fn cookies(req: &Message) -> Vec<(String, String)> {
    req.headers
        .get_all("Cookie")
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Value of the first cookie named `name`.
pub fn cookie(req: &Message, name: &str) -> Option<String> {
    cookies(req).into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

/// Flat string parameters extracted from a query string or body.
pub type Params = BTreeMap<String, String>;

/// Decode the query string, if any.
pub fn query_params(req: &Message) -> Params {
    req.query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Body format, selected from `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
    Other,
}

pub fn body_format(req: &Message) -> BodyFormat {
    let ct = req
        .content_type()
        .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase());
    match ct.as_deref() {
        Some("application/json") => BodyFormat::Json,
        Some("application/x-www-form-urlencoded") => BodyFormat::Form,
        Some(ct) if ct.ends_with("+json") => BodyFormat::Json,
        None if req.body.first() == Some(&b'{') => BodyFormat::Json,
        None => BodyFormat::Form,
        Some(_) => BodyFormat::Other,
    }
}

/// Decode a JSON-object or form-encoded body into string parameters.
///
/// JSON scalars are stringified (`"port": 9000` becomes `"9000"`); nested
/// values keep their JSON text. An empty body yields no parameters.
pub fn body_params(req: &Message) -> Result<Params, String> {
    if req.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::new());
    }
    match body_format(req) {
        BodyFormat::Json => {
            let value: Value = serde_json::from_slice(&req.body).map_err(|e| format!("invalid JSON body: {}", e))?;
            let Value::Object(map) = value else {
                return Err("JSON body must be an object".to_string());
            };
            Ok(map
                .into_iter()
                .filter_map(|(k, v)| match v {
                    Value::Null => None,
                    Value::String(s) => Some((k, s)),
                    other => Some((k, other.to_string())),
                })
                .collect())
        }
        BodyFormat::Form => Ok(url::form_urlencoded::parse(&req.body).into_owned().collect()),
        BodyFormat::Other => Err(format!(
            "unsupported Content-Type: {}",
            req.content_type().unwrap_or_default()
        )),
    }
}

/// Non-empty trimmed parameter.
pub fn param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
