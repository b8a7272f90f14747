// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ingest::{DeliveryPolicy, IngestConfig};

pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("ServerURL is required")]
    MissingServerUrl,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub flush_period: Duration,
    /// Bearer token required on ingestion routes. `None` disables auth.
    pub auth_token: Option<String>,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    pub max_page_size: usize,
    pub delivery: DeliveryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: PathBuf::from("tlytics.db"),
            flush_period: DEFAULT_FLUSH_PERIOD,
            auth_token: None,
            cors_origins: Vec::new(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden by `TLYTICS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("TLYTICS_BIND_ADDR") {
            cfg.bind_addr = parse("TLYTICS_BIND_ADDR", v)?;
        }
        if let Some(v) = lookup("TLYTICS_DB_PATH") {
            cfg.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TLYTICS_FLUSH_PERIOD_MS") {
            let ms: u64 = parse("TLYTICS_FLUSH_PERIOD_MS", v.clone())?;
            if ms == 0 {
                return Err(ConfigError::Invalid { var: "TLYTICS_FLUSH_PERIOD_MS", value: v });
            }
            cfg.flush_period = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("TLYTICS_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            cfg.auth_token = Some(v);
        }
        if let Some(v) = lookup("TLYTICS_CORS_ORIGINS") {
            cfg.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("TLYTICS_SPILL_PATH").filter(|v| !v.is_empty()) {
            cfg.delivery.spill_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TLYTICS_MAX_RETRIES") {
            cfg.delivery.retry.max_attempts = parse("TLYTICS_MAX_RETRIES", v)?;
        }

        Ok(cfg)
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            flush_period: self.flush_period,
            delivery: self.delivery.clone(),
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

/// Settings for a process shipping its events to a remote node.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. "http://192.168.1.100:8081"
    pub server_url: String,
    pub flush_period: Duration,
    pub timeout: Duration,
    pub auth_token: Option<String>,
    pub delivery: DeliveryPolicy,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            flush_period: DEFAULT_FLUSH_PERIOD,
            timeout: DEFAULT_HTTP_TIMEOUT,
            auth_token: None,
            delivery: DeliveryPolicy::default(),
        }
    }

    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            flush_period: self.flush_period,
            delivery: self.delivery.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.flush_period, Duration::from_secs(5));
        assert_eq!(cfg.max_page_size, 1000);
        assert!(cfg.auth_token.is_none());
        assert_eq!(cfg.delivery.retry.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = NodeConfig::from_lookup(lookup(&[
            ("TLYTICS_BIND_ADDR", "0.0.0.0:9000"),
            ("TLYTICS_DB_PATH", "/tmp/x.db"),
            ("TLYTICS_FLUSH_PERIOD_MS", "250"),
            ("TLYTICS_AUTH_TOKEN", "secret"),
            ("TLYTICS_CORS_ORIGINS", "http://a.test, http://b.test"),
            ("TLYTICS_SPILL_PATH", "/tmp/spill.jsonl"),
            ("TLYTICS_MAX_RETRIES", "5"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.flush_period, Duration::from_millis(250));
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(cfg.delivery.spill_path, Some(PathBuf::from("/tmp/spill.jsonl")));
        assert_eq!(cfg.delivery.retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(NodeConfig::from_lookup(lookup(&[("TLYTICS_BIND_ADDR", "nope")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("TLYTICS_FLUSH_PERIOD_MS", "0")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("TLYTICS_MAX_RETRIES", "-1")])).is_err());
    }
}
