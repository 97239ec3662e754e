//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Broker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// HTTP listen address (`host:port`).
    #[serde(default = "default_broker_http")]
    pub http: String,
    /// Enable the /metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            http: default_broker_http(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Publisher configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Root name announced to the broker.
    #[serde(default)]
    pub name: String,
    /// Directory tree to publish.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// HTTP listen address; also the address announced to the broker.
    #[serde(default = "default_publisher_http")]
    pub http: String,
    /// Broker address (`host:port`).
    #[serde(default = "default_broker_http")]
    pub broker: String,
    /// Directory holding the ledger and the compression cache.
    #[serde(default = "default_publisher_statedir")]
    pub statedir: PathBuf,
    /// Number of publish workers.
    #[serde(default = "default_nworkers")]
    pub nworkers: usize,
    /// Chunk length in bytes used when compressing plain files.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// zstd compression level.
    #[serde(default = "default_clevel")]
    pub clevel: i32,
    /// Watcher debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound for closing the pub/sub connection.
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    /// Upper bound for a single publish on the bus.
    #[serde(default = "default_request_timeout_secs")]
    pub publish_timeout_secs: u64,
    /// Enable the /metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            root: default_root(),
            http: default_publisher_http(),
            broker: default_broker_http(),
            statedir: default_publisher_statedir(),
            nworkers: default_nworkers(),
            chunk_size: default_chunk_size(),
            clevel: default_clevel(),
            debounce_ms: default_debounce_ms(),
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            publish_timeout_secs: default_request_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl PublisherConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("publisher name must not be empty".to_string());
        }
        if self.name.contains('/') {
            return Err(format!("publisher name must not contain '/': {}", self.name));
        }
        if self.nworkers == 0 {
            return Err("nworkers must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.statedir.join("db.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.statedir.join("cache")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Subscriber configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// HTTP listen address.
    #[serde(default = "default_subscriber_http")]
    pub http: String,
    /// Broker address (`host:port`).
    #[serde(default = "default_broker_http")]
    pub broker: String,
    /// Directory holding the roots database and the chunk cache.
    #[serde(default = "default_subscriber_statedir")]
    pub statedir: PathBuf,
    /// Timeout for requests to the broker and publishers.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound for closing the pub/sub connection.
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    /// Enable the /metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            http: default_subscriber_http(),
            broker: default_broker_http(),
            statedir: default_subscriber_statedir(),
            request_timeout_secs: default_request_timeout_secs(),
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl SubscriberConfig {
    pub fn db_path(&self) -> PathBuf {
        self.statedir.join("db.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.statedir.join("index.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.statedir.join("cache")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}

fn default_broker_http() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_publisher_http() -> String {
    "127.0.0.1:8001".to_string()
}

fn default_subscriber_http() -> String {
    "127.0.0.1:8002".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_publisher_statedir() -> PathBuf {
    PathBuf::from("_tessera/pub")
}

fn default_subscriber_statedir() -> PathBuf {
    PathBuf::from("_tessera/sub")
}

fn default_nworkers() -> usize {
    1
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_clevel() -> i32 {
    3
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_disconnect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_metrics_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.http, "127.0.0.1:8001");
        assert_eq!(config.broker, "127.0.0.1:8000");
        assert_eq!(config.nworkers, 1);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(5));
        assert_eq!(config.ledger_path(), PathBuf::from("_tessera/pub/db.json"));
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_publisher_deserialize_fills_defaults() {
        let json = r#"{"name": "foo", "root": "/srv/data"}"#;
        let config: PublisherConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "foo");
        assert_eq!(config.root, PathBuf::from("/srv/data"));
        assert_eq!(config.nworkers, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_publisher_validate() {
        let mut config = PublisherConfig::default();
        assert!(config.validate().is_err(), "empty name must be rejected");

        config.name = "foo".to_string();
        assert!(config.validate().is_ok());

        config.nworkers = 0;
        assert!(config.validate().is_err());
        config.nworkers = 2;

        config.chunk_size = 0;
        assert!(config.validate().is_err());
        config.chunk_size = 16;

        config.name = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subscriber_defaults() {
        let config: SubscriberConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.http, "127.0.0.1:8002");
        assert_eq!(config.statedir, PathBuf::from("_tessera/sub"));
        assert_eq!(config.cache_dir(), PathBuf::from("_tessera/sub/cache"));
        assert_eq!(config.index_path(), PathBuf::from("_tessera/sub/index.json"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_broker_defaults() {
        let config: BrokerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.http, "127.0.0.1:8000");
        assert!(config.metrics_enabled);
    }
}
