//! Chat-app HTTP surface.
//!
//! Every endpoint except `/login` requires a valid `SID` cookie, and a
//! session acts only as its own user: `from_peer` and `peer_id` may repeat
//! the session user but never name another peer. Bodies may
//! be JSON objects or form-encoded. Success replies are
//! `{"status":"success",...}`; failures are
//! `{"status":"error","error":<kind>,"message":...}`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::chat::registry::{PeerRegistry, ReadMode, RegistryError};
use crate::config::AppConfig;
use crate::http::error::HandlerError;
use crate::http::message::{Message, Method};
use crate::http::request::{self, param, Params};
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::routing::{Handler, RequestContext, RouteError, Router};
use crate::session::auth::{self, clear_session_cookie, session_cookie, Authenticator, OpenCredentials, Unauthorized};
use crate::session::SessionStore;

/// Failure of a chat endpoint, rendered as an error envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("{0}")]
    BadRequest(String),

    #[error("session for {user} cannot act as {claimed}")]
    Forbidden { user: String, claimed: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Internal(#[from] HandlerError),
}

impl ApiError {
    fn status_and_kind(&self) -> (u16, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (401, "Unauthorized"),
            ApiError::InvalidCredentials => (401, "InvalidCredentials"),
            ApiError::BadRequest(_) => (400, "BadRequest"),
            ApiError::Forbidden { .. } => (403, "Forbidden"),
            ApiError::Registry(e) => (e.status(), e.kind()),
            ApiError::Internal(_) => (500, "Internal"),
        }
    }

    /// Internal failures propagate to the connection handler; everything
    /// else becomes an error envelope.
    fn into_reply(self) -> Result<Message, HandlerError> {
        match self {
            ApiError::Internal(e) => Err(e),
            other => {
                let (status, kind) = other.status_and_kind();
                Ok(response::json_error(status, kind, other.to_string()))
            }
        }
    }
}

type ApiResult = Result<Message, ApiError>;

/// Chat-app state shared by every connection.
pub struct ChatApp {
    registry: Arc<PeerRegistry>,
    sessions: Arc<SessionStore>,
    auth: Arc<dyn Authenticator>,
    history_limit: usize,
    peer_ttl: Duration,
    peer_sweep_interval: Duration,
    session_sweep_interval: Duration,
}

impl ChatApp {
    pub fn new(config: &AppConfig) -> Self {
        let auth: Arc<dyn Authenticator> = if config.chat.open_auth {
            Arc::new(OpenCredentials)
        } else {
            auth::from_config(&config.auth)
        };
        Self {
            registry: Arc::new(PeerRegistry::new(&config.chat)),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs))),
            auth,
            history_limit: config.chat.history_limit,
            peer_ttl: Duration::from_secs(config.chat.peer_ttl_secs),
            peer_sweep_interval: Duration::from_secs(config.chat.sweep_interval_secs),
            session_sweep_interval: Duration::from_secs(config.session.sweep_interval_secs),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Route table for the chat-app server.
    pub fn router(self: &Arc<Self>) -> Result<Router, RouteError> {
        Router::builder()
            .route(Method::Post, "/login", api(self, Self::login))
            .route(Method::Post, "/logout", api(self, Self::logout))
            .route(Method::Post, "/submit-info", api(self, Self::submit_info))
            .route(Method::Get, "/get-list", api(self, Self::get_list))
            .route(Method::Post, "/connect-peer", api(self, Self::connect_peer))
            .route(Method::Post, "/broadcast-peer", api(self, Self::broadcast_peer))
            .route(Method::Post, "/send-peer", api(self, Self::send_peer))
            .route(Method::Get, "/get-messages", api(self, Self::get_messages))
            .route(Method::Get, "/channels", api(self, Self::channels))
            .build()
    }

    /// Start the idle-peer and expired-session sweepers.
    pub fn spawn_maintenance(&self, shutdown: &Shutdown) {
        self.registry
            .spawn_sweeper(self.peer_ttl, self.peer_sweep_interval, shutdown);
        self.sessions.spawn_sweeper(self.session_sweep_interval, shutdown);
    }

    fn login(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        let params = body(&req)?;
        let username = param(&params, "username").ok_or(ApiError::InvalidCredentials)?;
        let password = params.get("password").map(String::as_str).unwrap_or_default();
        if !self.auth.authenticate(username, password) {
            tracing::info!(username = %username, "Chat login rejected");
            return Err(ApiError::InvalidCredentials);
        }

        let token = self.sessions.issue(username);
        tracing::info!(username = %username, "Chat login accepted");
        let resp = response::json(
            200,
            &json!({
                "status": "success",
                "message": "Login successful",
                "user": { "username": username },
            }),
        )?;
        Ok(resp.with_header("Set-Cookie", session_cookie(&token)))
    }

    fn logout(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        self.user(&req)?;
        if let Some(token) = auth::session_token(&req) {
            self.sessions.revoke(&token);
        }
        let resp = response::json(200, &json!({ "status": "success", "message": "Logged out" }))?;
        Ok(resp.with_header("Set-Cookie", clear_session_cookie()))
    }

    fn submit_info(&self, req: Message, ctx: &RequestContext) -> ApiResult {
        let user = self.user(&req)?;
        let params = body(&req)?;
        let peer_id = param(&params, "peer_id").unwrap_or(user.as_str()).to_string();
        let ip = param(&params, "ip")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.peer_addr.ip().to_string());
        let port = param(&params, "port")
            .ok_or_else(|| ApiError::BadRequest("missing port".to_string()))?
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ApiError::BadRequest("port must be 1-65535".to_string()))?;

        let (peer, created) = self.registry.submit_info(&peer_id, &ip, port);
        Ok(response::json(
            200,
            &json!({
                "status": "success",
                "peer_id": peer.peer_id,
                "ip": peer.ip,
                "port": peer.port,
                "created": created,
            }),
        )?)
    }

    fn get_list(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        self.user(&req)?;
        let peers = self.registry.get_list();
        Ok(response::json(
            200,
            &json!({ "status": "success", "count": peers.len(), "peers": peers }),
        )?)
    }

    fn connect_peer(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        let user = self.user(&req)?;
        let params = body(&req)?;
        let from = acting_as(user, &params, "from_peer")?;
        let to = required(&params, "to_peer")?;

        let target = self.registry.connect_peer(&from, to)?;
        Ok(response::json(
            200,
            &json!({
                "status": "success",
                "from_peer": from,
                "target": { "peer_id": target.peer_id, "ip": target.ip, "port": target.port },
            }),
        )?)
    }

    fn broadcast_peer(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        let user = self.user(&req)?;
        let params = body(&req)?;
        let from = acting_as(user, &params, "from_peer")?;
        let text = required(&params, "message")?;

        let delivery = self.registry.broadcast(&from, text, param(&params, "channel"));
        Ok(response::json(
            200,
            &json!({
                "status": "success",
                "message": "Message broadcasted",
                "channel": delivery.message.channel,
                "seq": delivery.message.seq,
                "recipients": delivery.recipients.len(),
                "delivered_to": delivery.recipients,
            }),
        )?)
    }

    fn send_peer(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        let user = self.user(&req)?;
        let params = body(&req)?;
        let from = acting_as(user, &params, "from_peer")?;
        let text = required(&params, "message")?;

        let delivery = self
            .registry
            .send(&from, param(&params, "to_peer"), text, param(&params, "channel"))?;
        Ok(response::json(
            200,
            &json!({
                "status": "success",
                "message": "Message sent",
                "to": delivery.recipients.first(),
                "channel": delivery.message.channel,
                "seq": delivery.message.seq,
            }),
        )?)
    }

    fn get_messages(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        let user = self.user(&req)?;
        let query = request::query_params(&req);

        if let Some(channel) = param(&query, "channel") {
            let limit = match param(&query, "limit") {
                Some(v) => v
                    .parse::<usize>()
                    .map_err(|_| ApiError::BadRequest("limit must be a non-negative integer".to_string()))?,
                None => self.history_limit,
            };
            let messages = self.registry.channel_history(channel, limit);
            return Ok(response::json(
                200,
                &json!({
                    "status": "success",
                    "channel": channel,
                    "count": messages.len(),
                    "messages": messages,
                }),
            )?);
        }

        let peer_id = acting_as(user, &query, "peer_id")?;
        let mode = match param(&query, "peek") {
            Some("true") | Some("1") => ReadMode::Peek,
            _ => ReadMode::Drain,
        };
        let messages = self.registry.get_messages(&peer_id, mode)?;
        Ok(response::json(
            200,
            &json!({
                "status": "success",
                "peer_id": peer_id,
                "count": messages.len(),
                "messages": messages,
            }),
        )?)
    }

    fn channels(&self, req: Message, _ctx: &RequestContext) -> ApiResult {
        self.user(&req)?;
        let channels = self.registry.channels();
        Ok(response::json(
            200,
            &json!({ "status": "success", "count": channels.len(), "channels": channels }),
        )?)
    }

    fn user(&self, req: &Message) -> Result<String, ApiError> {
        Ok(auth::require_session(&self.sessions, req)?)
    }
}

/// Bind a chat endpoint to the shared app, rendering `ApiError`s.
fn api(app: &Arc<ChatApp>, f: fn(&ChatApp, Message, &RequestContext) -> ApiResult) -> impl Handler {
    let app = Arc::clone(app);
    move |req: Message, ctx: RequestContext| {
        let app = Arc::clone(&app);
        async move {
            match f(&app, req, &ctx) {
                Ok(resp) => Ok(resp),
                Err(e) => e.into_reply(),
            }
        }
    }
}

fn body(req: &Message) -> Result<Params, ApiError> {
    request::body_params(req).map_err(ApiError::BadRequest)
}

/// The peer a request acts as. `field` may only repeat the session user.
fn acting_as(user: String, params: &Params, field: &str) -> Result<String, ApiError> {
    match param(params, field) {
        Some(claimed) if claimed != user => {
            tracing::warn!(user = %user, claimed = %claimed, field, "Rejected request acting as another peer");
            Err(ApiError::Forbidden {
                user,
                claimed: claimed.to_string(),
            })
        }
        _ => Ok(user),
    }
}

fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str, ApiError> {
    param(params, key).ok_or_else(|| ApiError::BadRequest(format!("missing {}", key)))
}
