//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, value ranges, and names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// One semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `listener.bind_address`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_positive(&mut errors, "listener.max_connections", config.listener.max_connections as u64);

    check_positive(&mut errors, "timeouts.connect_secs", config.timeouts.connect_secs);
    check_positive(&mut errors, "timeouts.idle_secs", config.timeouts.idle_secs);
    check_positive(&mut errors, "timeouts.upstream_secs", config.timeouts.upstream_secs);
    check_positive(&mut errors, "timeouts.handshake_secs", config.timeouts.handshake_secs);
    check_positive(&mut errors, "timeouts.p2p_write_secs", config.timeouts.p2p_write_secs);

    if config.limits.max_header_bytes < 64 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be at least 64"));
    }
    check_positive(&mut errors, "limits.max_body_bytes", config.limits.max_body_bytes as u64);

    check_positive(&mut errors, "session.ttl_secs", config.session.ttl_secs);
    check_positive(&mut errors, "session.sweep_interval_secs", config.session.sweep_interval_secs);

    if !config.auth.open && config.auth.users.is_empty() {
        errors.push(ValidationError::new("auth.users", "must not be empty unless auth.open is set"));
    }
    if config.auth.users.keys().any(|u| u.trim().is_empty()) {
        errors.push(ValidationError::new("auth.users", "usernames must not be empty"));
    }

    check_host_port(&mut errors, "proxy.upstream", &config.proxy.upstream);
    if let Some(host) = &config.proxy.host_rewrite {
        if host.trim().is_empty() || host.contains(char::is_whitespace) {
            errors.push(ValidationError::new("proxy.host_rewrite", "must be a non-empty host without whitespace"));
        }
    }

    if config.chat.default_channel.trim().is_empty() {
        errors.push(ValidationError::new("chat.default_channel", "must not be empty"));
    }
    check_positive(&mut errors, "chat.peer_ttl_secs", config.chat.peer_ttl_secs);
    check_positive(&mut errors, "chat.sweep_interval_secs", config.chat.sweep_interval_secs);
    check_positive(&mut errors, "chat.mailbox_capacity", config.chat.mailbox_capacity as u64);
    check_positive(&mut errors, "chat.history_limit", config.chat.history_limit as u64);
    check_positive(&mut errors, "chat.history_capacity", config.chat.history_capacity as u64);

    if config.p2p.peer_id.trim().is_empty() || config.p2p.peer_id.contains(char::is_whitespace) {
        errors.push(ValidationError::new("p2p.peer_id", "must be a non-empty identifier without whitespace"));
    }
    check_socket_addr(&mut errors, "p2p.listen_address", &config.p2p.listen_address);
    check_positive(&mut errors, "p2p.inbox_capacity", config.p2p.inbox_capacity as u64);
    if let Some(url) = &config.p2p.tracker_url {
        match url::Url::parse(url) {
            Ok(u) if u.scheme() == "http" => {}
            Ok(_) => errors.push(ValidationError::new("p2p.tracker_url", "only http:// trackers are supported")),
            Err(e) => errors.push(ValidationError::new("p2p.tracker_url", format!("invalid URL: {}", e))),
        }
    }

    if !["trace", "debug", "info", "warn", "error"].contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled {
        check_socket_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address {:?}", value)));
    }
}

/// `host:port` where host may be a name; resolution happens at connect time.
fn check_host_port(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    let valid = value
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().map(|p| p > 0).unwrap_or(false))
        .unwrap_or(false);
    if !valid {
        errors.push(ValidationError::new(field, format!("expected host:port, got {:?}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "nope".into();
        config.timeouts.idle_secs = 0;
        config.proxy.upstream = "localhost".into();
        config.p2p.peer_id = "has space".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "timeouts.idle_secs", "proxy.upstream", "p2p.peer_id"]
        );
    }

    #[test]
    fn bounded_queues_and_write_deadline_must_be_positive() {
        let mut config = AppConfig::default();
        config.timeouts.p2p_write_secs = 0;
        config.chat.history_capacity = 0;
        config.p2p.inbox_capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["timeouts.p2p_write_secs", "chat.history_capacity", "p2p.inbox_capacity"]
        );
    }

    #[test]
    fn upstream_accepts_hostnames() {
        let mut config = AppConfig::default();
        config.proxy.upstream = "backend.internal:9000".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn closed_auth_needs_users() {
        let mut config = AppConfig::default();
        config.auth.users.clear();
        assert!(validate_config(&config).is_err());
        config.auth.open = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn tracker_url_must_be_http() {
        let mut config = AppConfig::default();
        config.p2p.tracker_url = Some("ftp://x".into());
        assert!(validate_config(&config).is_err());
        config.p2p.tracker_url = Some("http://127.0.0.1:8001".into());
        assert!(validate_config(&config).is_ok());
    }
}
