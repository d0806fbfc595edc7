//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Persona server. Every field has a default, so a
/// config file only needs the values it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Base URL used in links sent to users, such as password-reset emails.
    pub public_url: String,
    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Outbound frames buffered per WebSocket connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Interval between server Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without a Pong or inbound frame.
    pub heartbeat_timeout_secs: u64,
    /// Time a client has to send a complete request head. Bounds the
    /// WebSocket upgrade handshake, including half-open connections.
    pub handshake_timeout_secs: u64,
    /// Deadline for every AI provider call. Capped below the heartbeat
    /// timeout, since a connection reads nothing while its chat is in flight.
    pub provider_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Lifetime of a login session token, in hours.
    pub session_ttl_hours: u64,
    /// Lifetime of a password-reset token, in minutes.
    pub reset_token_ttl_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            public_url: "http://localhost:5000".into(),
            database_path: None,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            handshake_timeout_secs: 10,
            provider_timeout_secs: 60,
            max_message_size: 1024 * 1024,
            session_ttl_hours: 24 * 7,
            reset_token_ttl_minutes: 60,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    pub fn provider_timeout(&self) -> Duration {
        let ceiling = self.heartbeat_timeout().saturating_sub(Duration::from_secs(1)).max(Duration::from_secs(1));
        Duration::from_secs(self.provider_timeout_secs.max(1)).min(ceiling)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 3600)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_minutes * 60)
    }

    /// Absolute link for a password-reset token.
    pub fn reset_url(&self, token: &str) -> String {
        format!("{}/reset-password?token={token}", self.public_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn default_timings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.session_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(cfg.reset_token_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn zero_durations_clamped() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            provider_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn provider_timeout_stays_inside_liveness_window() {
        let cfg = ServerConfig {
            heartbeat_timeout_secs: 45,
            provider_timeout_secs: 120,
            ..Default::default()
        };
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(44));
        assert!(cfg.provider_timeout() < cfg.heartbeat_timeout());

        let cfg = ServerConfig {
            heartbeat_timeout_secs: 90,
            provider_timeout_secs: 90,
            ..Default::default()
        };
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(89));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":8080,"database_path":"data/persona.db"}"#).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_path, Some(PathBuf::from("data/persona.db")));
        assert_eq!(cfg.max_send_queue, 256);
        assert_eq!(cfg.heartbeat_timeout_secs, 90);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.public_url, cfg.public_url);
        assert_eq!(back.max_message_size, cfg.max_message_size);
    }

    #[test]
    fn reset_url_joins_cleanly() {
        let cfg = ServerConfig {
            public_url: "https://persona.example/".into(),
            ..Default::default()
        };
        assert_eq!(cfg.reset_url("abc"), "https://persona.example/reset-password?token=abc");
    }
}
