//! Backend web app: login form, protected index, echo.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::backend::pages;
use crate::config::AppConfig;
use crate::http::error::HandlerError;
use crate::http::message::{Message, Method};
use crate::http::request::{self, body_format, param, BodyFormat};
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::routing::{with_state, RequestContext, RouteError, Router};
use crate::session::auth::{self, clear_session_cookie, session_cookie, Authenticator};
use crate::session::SessionStore;

/// Backend state shared by every connection.
pub struct BackendApp {
    sessions: Arc<SessionStore>,
    auth: Arc<dyn Authenticator>,
    sweep_interval: Duration,
}

impl BackendApp {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs))),
            auth: auth::from_config(&config.auth),
            sweep_interval: Duration::from_secs(config.session.sweep_interval_secs),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn router(self: &Arc<Self>) -> Result<Router, RouteError> {
        Router::builder()
            .route(Method::Get, "/login.html", with_state(self, Self::login_page))
            .route(Method::Post, "/login", with_state(self, Self::login))
            .route(Method::Get, "/", with_state(self, Self::index))
            .route(Method::Get, "/index.html", with_state(self, Self::index))
            .route(Method::Post, "/echo", with_state(self, Self::echo))
            .route(Method::Post, "/logout", with_state(self, Self::logout))
            .build()
    }

    pub fn spawn_maintenance(&self, shutdown: &Shutdown) {
        self.sessions.spawn_sweeper(self.sweep_interval, shutdown);
    }

    fn login_page(&self, _req: Message, _ctx: &RequestContext) -> Result<Message, HandlerError> {
        Ok(response::html(200, pages::LOGIN_HTML))
    }

    /// Valid credentials get the index page and a session cookie.
    fn login(&self, req: Message, ctx: &RequestContext) -> Result<Message, HandlerError> {
        let params = match request::body_params(&req) {
            Ok(params) => params,
            Err(e) => return Ok(response::error(400, &e)),
        };
        let username = param(&params, "username").unwrap_or_default();
        let password = params.get("password").map(String::as_str).unwrap_or_default();

        if username.is_empty() || !self.auth.authenticate(username, password) {
            tracing::info!(request_id = %ctx.request_id, username = %username, "Login rejected");
            return Ok(response::html(401, pages::unauthorized("Invalid username or password")));
        }

        let token = self.sessions.issue(username);
        tracing::info!(request_id = %ctx.request_id, username = %username, "Login accepted");
        Ok(response::html(200, pages::index(username)).with_header("Set-Cookie", session_cookie(&token)))
    }

    fn index(&self, req: Message, _ctx: &RequestContext) -> Result<Message, HandlerError> {
        match auth::require_session(&self.sessions, &req) {
            Ok(user) => Ok(response::html(200, pages::index(&user))),
            Err(_) => Ok(response::html(401, pages::unauthorized("Please login first"))),
        }
    }

    /// JSON bodies come back as `{"echo": <body>}`; anything else is echoed
    /// verbatim with its content type.
    fn echo(&self, req: Message, _ctx: &RequestContext) -> Result<Message, HandlerError> {
        if body_format(&req) == BodyFormat::Json {
            return match serde_json::from_slice::<Value>(&req.body) {
                Ok(value) => response::json(200, &json!({ "echo": value })),
                Err(_) => response::json(400, &json!({ "error": "Invalid JSON in /echo" })),
            };
        }

        let content_type = req.content_type().unwrap_or(response::TEXT_PLAIN).to_string();
        Ok(Message::response(200).with_body(&content_type, req.body))
    }

    fn logout(&self, req: Message, _ctx: &RequestContext) -> Result<Message, HandlerError> {
        if let Some(token) = auth::session_token(&req) {
            self.sessions.revoke(&token);
        }
        Ok(response::html(200, pages::LOGIN_HTML).with_header("Set-Cookie", clear_session_cookie()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestId;
    use crate::net::connection::ConnectionId;

    fn ctx() -> RequestContext {
        RequestContext {
            peer_addr: "127.0.0.1:40000".parse().unwrap(),
            connection_id: ConnectionId::new(),
            request_id: RequestId::generate(),
        }
    }

    fn router() -> Router {
        Arc::new(BackendApp::new(&AppConfig::default())).router().unwrap()
    }

    fn form_login(user: &str, pass: &str) -> Message {
        Message::request(Method::Post, "/login").with_body(
            "application/x-www-form-urlencoded",
            format!("username={}&password={}", user, pass),
        )
    }

    #[tokio::test]
    async fn login_then_index() {
        let router = router();
        let resp = router.dispatch(form_login("admin", "password"), ctx()).await.unwrap();
        assert_eq!(resp.status(), Some(200));
        let cookie = resp.headers.get("Set-Cookie").unwrap().to_string();
        assert!(cookie.starts_with("SID="));
        let sid = cookie.split(';').next().unwrap().to_string();

        let index = router
            .dispatch(Message::request(Method::Get, "/index.html").with_header("Cookie", sid), ctx())
            .await
            .unwrap();
        assert_eq!(index.status(), Some(200));
        assert!(index.body_text().contains("Welcome, admin"));
    }

    #[tokio::test]
    async fn bad_credentials_are_401_without_cookie() {
        let resp = router().dispatch(form_login("admin", "nope"), ctx()).await.unwrap();
        assert_eq!(resp.status(), Some(401));
        assert!(!resp.headers.contains("Set-Cookie"));
    }

    #[tokio::test]
    async fn index_without_session_is_401() {
        let resp = router().dispatch(Message::request(Method::Get, "/"), ctx()).await.unwrap();
        assert_eq!(resp.status(), Some(401));
        assert!(resp.body_text().contains("/login.html"));
    }

    #[tokio::test]
    async fn echo_wraps_json_and_mirrors_text() {
        let router = router();
        let json_req = Message::request(Method::Post, "/echo").with_body("application/json", r#"{"a":1}"#);
        let resp = router.dispatch(json_req, ctx()).await.unwrap();
        let v: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(v["echo"]["a"], 1);

        let text_req = Message::request(Method::Post, "/echo").with_body("text/plain", "ping");
        let resp = router.dispatch(text_req, ctx()).await.unwrap();
        assert_eq!(resp.body, b"ping");
        assert_eq!(resp.content_type(), Some("text/plain"));

        let broken = Message::request(Method::Post, "/echo").with_body("application/json", "{nope");
        assert_eq!(router.dispatch(broken, ctx()).await.unwrap().status(), Some(400));
    }
}
