//! HTTP client for a chat-app tracker.
//!
//! Used by P2P nodes to announce themselves and resolve peer ids, and by
//! `chat-cli` to drive every chat endpoint.

use reqwest::header::{COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::session::auth::SESSION_COOKIE;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker rejected request ({status} {kind}): {message}")]
    Rejected { status: u16, kind: String, message: String },

    #[error("not logged in to the tracker")]
    NotLoggedIn,
}

/// A peer as listed by `/get-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerPeer {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
}

impl TrackerPeer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Query for `/get-messages`.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub peer_id: Option<String>,
    pub peek: bool,
    pub channel: Option<String>,
    pub limit: Option<usize>,
}

pub struct TrackerClient {
    base: String,
    http: reqwest::Client,
    session: Option<String>,
}

impl TrackerClient {
    /// `base_url` is the tracker root, e.g. `http://127.0.0.1:8001`.
    pub fn new(base_url: &str) -> Result<Self, TrackerError> {
        let parsed = url::Url::parse(base_url).map_err(|e| TrackerError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" {
            return Err(TrackerError::InvalidUrl {
                url: base_url.to_string(),
                reason: "only http:// is supported".to_string(),
            });
        }
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            session: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Log in and keep the session cookie for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Value, TrackerError> {
        let res = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        let token = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_from_set_cookie);
        let body = envelope(res).await?;
        self.session = Some(token.ok_or(TrackerError::NotLoggedIn)?);
        tracing::debug!(tracker = %self.base, username = %username, "Logged in to tracker");
        Ok(body)
    }

    pub async fn logout(&mut self) -> Result<Value, TrackerError> {
        let body = self.post("/logout", Map::new()).await?;
        self.session = None;
        Ok(body)
    }

    /// Register this peer. Without `ip` the tracker records the caller's address.
    pub async fn submit_info(&self, peer_id: &str, ip: Option<&str>, port: u16) -> Result<Value, TrackerError> {
        let mut body = Map::new();
        body.insert("peer_id".into(), json!(peer_id));
        body.insert("port".into(), json!(port));
        if let Some(ip) = ip {
            body.insert("ip".into(), json!(ip));
        }
        self.post("/submit-info", body).await
    }

    pub async fn get_list(&self) -> Result<Vec<TrackerPeer>, TrackerError> {
        let body = self.get("/get-list", &[]).await?;
        let peers = body.get("peers").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(peers).map_err(|e| TrackerError::Rejected {
            status: 200,
            kind: "MalformedReply".to_string(),
            message: e.to_string(),
        })
    }

    /// Look a peer up by id.
    pub async fn resolve(&self, peer_id: &str) -> Result<Option<TrackerPeer>, TrackerError> {
        Ok(self.get_list().await?.into_iter().find(|p| p.peer_id == peer_id))
    }

    pub async fn connect_peer(&self, from: Option<&str>, to: &str) -> Result<Value, TrackerError> {
        let mut body = Map::new();
        insert_opt(&mut body, "from_peer", from);
        body.insert("to_peer".into(), json!(to));
        self.post("/connect-peer", body).await
    }

    pub async fn broadcast(&self, from: Option<&str>, message: &str, channel: Option<&str>) -> Result<Value, TrackerError> {
        let mut body = Map::new();
        insert_opt(&mut body, "from_peer", from);
        body.insert("message".into(), json!(message));
        insert_opt(&mut body, "channel", channel);
        self.post("/broadcast-peer", body).await
    }

    pub async fn send(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        message: &str,
        channel: Option<&str>,
    ) -> Result<Value, TrackerError> {
        let mut body = Map::new();
        insert_opt(&mut body, "from_peer", from);
        insert_opt(&mut body, "to_peer", to);
        body.insert("message".into(), json!(message));
        insert_opt(&mut body, "channel", channel);
        self.post("/send-peer", body).await
    }

    pub async fn get_messages(&self, query: &MessageQuery) -> Result<Value, TrackerError> {
        let mut pairs = Vec::new();
        if let Some(peer_id) = &query.peer_id {
            pairs.push(("peer_id", peer_id.clone()));
        }
        if query.peek {
            pairs.push(("peek", "true".to_string()));
        }
        if let Some(channel) = &query.channel {
            pairs.push(("channel", channel.clone()));
        }
        if let Some(limit) = query.limit {
            pairs.push(("limit", limit.to_string()));
        }
        self.get("/get-messages", &pairs).await
    }

    pub async fn channels(&self) -> Result<Value, TrackerError> {
        self.get("/channels", &[]).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn cookie(&self) -> Result<String, TrackerError> {
        self.session
            .as_ref()
            .map(|token| format!("{}={}", SESSION_COOKIE, token))
            .ok_or(TrackerError::NotLoggedIn)
    }

    async fn post(&self, path: &str, body: Map<String, Value>) -> Result<Value, TrackerError> {
        let res = self
            .http
            .post(self.url(path))
            .header(COOKIE, self.cookie()?)
            .json(&Value::Object(body))
            .send()
            .await?;
        envelope(res).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, TrackerError> {
        let mut url = self.url(path);
        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())))
                .finish();
            url.push('?');
            url.push_str(&encoded);
        }
        let res = self.http.get(url).header(COOKIE, self.cookie()?).send().await?;
        envelope(res).await
    }
}

fn insert_opt(body: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        body.insert(key.to_string(), json!(v));
    }
}

fn session_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.trim() == SESSION_COOKIE && !value.is_empty()).then(|| value.trim().to_string())
}

/// Decode a chat envelope, turning `{"status":"error"}` into an error.
async fn envelope(res: reqwest::Response) -> Result<Value, TrackerError> {
    let status = res.status().as_u16();
    let text = res.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "status": "error", "message": text }));

    if body.get("status").and_then(Value::as_str) == Some("success") {
        return Ok(body);
    }
    Err(TrackerError::Rejected {
        status,
        kind: body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Error")
            .to_string(),
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
