//! Server configuration
//!
//! Read from the process environment, after loading a `.env` file if present.

use std::env;

/// Default bind address
const DEFAULT_ADDR: &str = "127.0.0.1:4000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Unset means single instance on the in-memory bus
    pub redis_url: Option<String>,
    pub fanout_channel: String,
    pub history_limit: u32,
    pub max_message_len: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:data/pairchat.db?mode=rwc".to_string()),
            db_max_connections: get("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            redis_url: get("REDIS_URL").filter(|v| !v.trim().is_empty()),
            fanout_channel: get("FANOUT_CHANNEL").unwrap_or_else(|| "pairchat:fanout".to_string()),
            history_limit: get("HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            max_message_len: get("MAX_MESSAGE_LEN")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_ADDR);
        assert_eq!(config.history_limit, 50);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6379"),
            ("HISTORY_LIMIT", "20"),
            ("MAX_MESSAGE_LEN", "lots"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.max_message_len, 4000);
    }
}
