//! Credential checking and session cookies.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::AuthConfig;
use crate::http::message::Message;
use crate::http::request;
use crate::session::store::SessionStore;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "SID";

/// Request carried no valid session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("missing or invalid session")]
pub struct Unauthorized;

/// Decides whether a username/password pair may log in.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Fixed user table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        self.users.get(username).is_some_and(|expected| expected == password)
    }
}

/// Accepts any non-empty username and password.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCredentials;

impl Authenticator for OpenCredentials {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        !username.trim().is_empty() && !password.is_empty()
    }
}

/// `auth.open` selects [`OpenCredentials`], otherwise the `auth.users` table.
pub fn from_config(auth: &AuthConfig) -> Arc<dyn Authenticator> {
    if auth.open {
        Arc::new(OpenCredentials)
    } else {
        Arc::new(StaticCredentials::new(auth.users.clone()))
    }
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, token)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0", SESSION_COOKIE)
}

/// The session token presented by the request, if any.
pub fn session_token(req: &Message) -> Option<String> {
    request::cookie(req, SESSION_COOKIE).filter(|t| !t.is_empty())
}

/// Resolve the request's session to its user.
pub fn require_session(store: &SessionStore, req: &Message) -> Result<String, Unauthorized> {
    let token = session_token(req).ok_or(Unauthorized)?;
    store.validate(&token).ok_or(Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Method;
    use std::time::Duration;

    #[test]
    fn static_credentials_check_table() {
        let auth = from_config(&AuthConfig::default());
        assert!(auth.authenticate("admin", "password"));
        assert!(!auth.authenticate("admin", "wrong"));
        assert!(!auth.authenticate("nobody", "password"));
    }

    #[test]
    fn open_credentials_need_non_empty_values() {
        let auth = OpenCredentials;
        assert!(auth.authenticate("anyone", "x"));
        assert!(!auth.authenticate("", "x"));
        assert!(!auth.authenticate("anyone", ""));
    }

    #[test]
    fn require_session_reads_cookie() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.issue("alice");

        let req = Message::request(Method::Get, "/").with_header("Cookie", format!("theme=dark; SID={}", token));
        assert_eq!(require_session(&store, &req), Ok("alice".to_string()));

        let missing = Message::request(Method::Get, "/");
        assert_eq!(require_session(&store, &missing), Err(Unauthorized));

        let forged = Message::request(Method::Get, "/").with_header("Cookie", "SID=deadbeef");
        assert_eq!(require_session(&store, &forged), Err(Unauthorized));
    }

    #[test]
    fn cookie_headers() {
        assert_eq!(session_cookie("abc"), "SID=abc; Path=/; HttpOnly");
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
