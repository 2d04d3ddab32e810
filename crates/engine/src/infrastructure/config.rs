//! Application configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::infrastructure::queues::RetryPolicy;
use crate::use_cases::tasks::{BridgeConfig, RetrySeed, WorkerConfig};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,

    /// CORS allowed origins (comma-separated, or "*" for any)
    pub cors_allowed_origins: Vec<String>,

    pub gemini: GeminiConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub bridge: BridgeConfig,
    pub assets: AssetStoreConfig,

    /// Per-subscription buffer on the in-process event bus
    pub bus_subscriber_buffer: usize,
}

/// Generative backend configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// API root, or an AI gateway fronting it
    pub base_url: String,
    /// Bearer token for the AI gateway, if one is in front of the API
    pub gateway_token: Option<String>,
    pub model: String,
    pub include_thoughts: bool,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Sqlite,
}

/// Queue system configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// SQLite database path (if using sqlite backend)
    pub sqlite_path: String,
    pub retry: RetryPolicy,
    /// How long to keep completed/failed items before cleanup (hours)
    pub history_retention_hours: u64,
    /// Cleanup worker interval (seconds)
    pub cleanup_interval_seconds: u64,
    /// Recovery poll interval for delayed items and missed notifications (seconds)
    pub recovery_poll_interval_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            sqlite_path: "./data/queue.db".to_string(),
            retry: RetryPolicy::default(),
            history_retention_hours: 24,
            cleanup_interval_seconds: 3600,
            recovery_poll_interval_seconds: 30,
        }
    }
}

/// Task state cache retention
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime, counted from the last write
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AssetStoreConfig {
    pub storage_dir: String,
    pub public_base_url: String,
}

/// Read `key`, falling back to `default` when unset or unparseable.
fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = &lookup;

        let backend = match string_or(lookup, "QUEUE_BACKEND", "sqlite").as_str() {
            "sqlite" => QueueBackend::Sqlite,
            "memory" => QueueBackend::Memory,
            other => {
                tracing::warn!(value = %other, "Unknown QUEUE_BACKEND, falling back to sqlite");
                QueueBackend::Sqlite
            }
        };

        let retry_seed = match string_or(lookup, "WORKER_RETRY_SEED", "resume").as_str() {
            "resume" => RetrySeed::Resume,
            "restart" => RetrySeed::Restart,
            other => {
                tracing::warn!(value = %other, "Unknown WORKER_RETRY_SEED, falling back to resume");
                RetrySeed::Resume
            }
        };

        let recovery_poll_interval_seconds: u64 =
            parse_or(lookup, "QUEUE_RECOVERY_POLL_INTERVAL_SECONDS", 30);

        let base_url = lookup("GEMINI_BASE_URL")
            .or_else(|| lookup("AI_GATEWAY_GEMINI"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());

        Ok(Self {
            server_host: string_or(lookup, "SERVER_HOST", "0.0.0.0"),
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            cors_allowed_origins: string_or(lookup, "CORS_ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            gemini: GeminiConfig {
                api_key: lookup("GEMINI_API_KEY")
                    .filter(|v| !v.trim().is_empty())
                    .context("GEMINI_API_KEY environment variable is required")?,
                base_url: base_url.trim_end_matches('/').to_string(),
                gateway_token: lookup("AI_GATEWAY_TOKEN").filter(|v| !v.trim().is_empty()),
                model: string_or(lookup, "GEMINI_MODEL", "gemini-3-pro-image-preview"),
                include_thoughts: parse_or(lookup, "GEMINI_INCLUDE_THOUGHTS", true),
                request_timeout: Duration::from_secs(parse_or(
                    lookup,
                    "GEMINI_REQUEST_TIMEOUT_SECONDS",
                    300,
                )),
            },

            queue: QueueConfig {
                backend,
                sqlite_path: string_or(lookup, "QUEUE_SQLITE_PATH", "./data/queue.db"),
                retry: RetryPolicy {
                    max_attempts: parse_or(lookup, "QUEUE_MAX_ATTEMPTS", 3u32).max(1),
                    base_delay_ms: parse_or(lookup, "QUEUE_RETRY_BASE_DELAY_MS", 1000),
                    max_delay_ms: parse_or(lookup, "QUEUE_RETRY_MAX_DELAY_MS", 30000),
                    jitter_factor: parse_or(lookup, "QUEUE_RETRY_JITTER", 0.2),
                },
                history_retention_hours: parse_or(lookup, "QUEUE_HISTORY_RETENTION_HOURS", 24),
                cleanup_interval_seconds: parse_or(lookup, "QUEUE_CLEANUP_INTERVAL_SECONDS", 3600),
                recovery_poll_interval_seconds,
            },

            worker: WorkerConfig {
                concurrency: parse_or(lookup, "WORKER_CONCURRENCY", 4usize).max(1),
                retry_seed,
                recovery_poll_interval: Duration::from_secs(recovery_poll_interval_seconds.max(1)),
            },

            cache: CacheConfig {
                ttl: Duration::from_secs(parse_or(lookup, "TASK_CACHE_TTL_SECONDS", 86_400)),
                cleanup_interval: Duration::from_secs(
                    parse_or(lookup, "TASK_CACHE_CLEANUP_INTERVAL_SECONDS", 300u64).max(1),
                ),
            },

            bridge: BridgeConfig {
                poll_interval: Duration::from_millis(
                    parse_or(lookup, "BRIDGE_POLL_INTERVAL_MS", 2000u64).max(10),
                ),
                event_buffer: parse_or(lookup, "BRIDGE_EVENT_BUFFER", 64usize).max(1),
            },

            assets: AssetStoreConfig {
                storage_dir: string_or(lookup, "ASSET_STORAGE_DIR", "./data/assets"),
                public_base_url: string_or(
                    lookup,
                    "ASSET_PUBLIC_BASE_URL",
                    "http://localhost:3000/assets",
                )
                .trim_end_matches('/')
                .to_string(),
            },

            bus_subscriber_buffer: parse_or(lookup, "BUS_SUBSCRIBER_BUFFER", 256usize).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_api_key_is_set() {
        let config = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cors_allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.gemini.model, "gemini-3-pro-image-preview");
        assert!(config.gemini.include_thoughts);
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.retry.max_attempts, 3);
        assert_eq!(config.worker.retry_seed, RetrySeed::Resume);
        assert_eq!(config.bridge.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.cache.ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn missing_api_key_is_an_error() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn gateway_alias_and_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("AI_GATEWAY_GEMINI", "https://gateway.example/gemini/"),
            ("AI_GATEWAY_TOKEN", "secret"),
            ("QUEUE_BACKEND", "memory"),
            ("WORKER_RETRY_SEED", "restart"),
            ("WORKER_CONCURRENCY", "not-a-number"),
            ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test"),
        ]))
        .unwrap();

        assert_eq!(config.gemini.base_url, "https://gateway.example/gemini");
        assert_eq!(config.gemini.gateway_token.as_deref(), Some("secret"));
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.worker.retry_seed, RetrySeed::Restart);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }
}
