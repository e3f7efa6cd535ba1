//! In-memory session store.
//!
//! # Responsibilities
//! - Issue unguessable session tokens on login
//! - Resolve a token back to its user until it expires
//! - Revoke on logout and sweep expired entries periodically
//!
//! # Design Decisions
//! - Tokens are 32 bytes from the OS RNG, hex-encoded
//! - Backed by `DashMap`; every operation is a single atomic map step
//! - Expired entries are removed lazily on lookup as well as by the sweeper

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Raw token length in bytes (64 hex characters on the wire).
const TOKEN_BYTES: usize = 32;

/// One logged-in session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Token → session map shared by every connection task.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store whose sessions live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Create a session for `user` and return its token.
    pub fn issue(&self, user: &str) -> String {
        let token = generate_token();
        let now = Instant::now();
        self.sessions.insert(
            token.clone(),
            Session {
                user: user.to_string(),
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        metrics::record_session_event("issued");
        tracing::debug!(user = %user, "Session issued");
        token
    }

    /// The user owning `token`, if the session exists and has not expired.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        if self.sessions.remove_if(token, |_, s| s.is_expired(now)).is_some() {
            metrics::record_session_event("expired");
            return None;
        }
        self.sessions.get(token).map(|s| s.user.clone())
    }

    /// Remove a session. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token).is_some();
        if removed {
            metrics::record_session_event("revoked");
        }
        removed
    }

    /// Remove sessions older than `ttl` or past their own expiry.
    /// Returns how many were removed.
    pub fn expire_after(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.sessions.retain(|_, s| {
            let stale = s.is_expired(now) || now.duration_since(s.created_at) >= ttl;
            if stale {
                removed += 1;
            }
            !stale
        });
        for _ in 0..removed {
            metrics::record_session_event("expired");
        }
        removed
    }

    /// Configured session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `expire_after(ttl)` every `interval` until shutdown.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>, interval: Duration, shutdown: &Shutdown) -> JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.expire_after(store.ttl);
                        if removed > 0 {
                            tracing::info!(removed, remaining = store.len(), "Expired sessions swept");
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
        })
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
