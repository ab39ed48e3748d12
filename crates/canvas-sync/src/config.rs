//! Connection settings for the supported backends

use std::{env, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::data::AdapterError;

/// The closed set of backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Bolt protocol with multi-statement transactions.
    Transactional,
    /// HTTP with streamed event results and no transactions.
    Streaming,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Transactional => write!(f, "bolt"),
            BackendKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// Configuration for a Bolt (transactional) connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoltConfig {
    pub uri: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    pub pool_size: usize,
    pub connection_timeout: Duration,
    pub connection_retry_count: u32,
    pub connection_retry_delay: Duration,
    pub query_timeout: Duration,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            uri: "neo4j://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: "password".to_string(),
            database: None,
            pool_size: 10,
            connection_timeout: Duration::from_secs(10),
            connection_retry_count: 3,
            connection_retry_delay: Duration::from_secs(2),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the streaming HTTP backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    /// Base URL, e.g. `http://localhost:3000`
    pub service_url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Name of the graph queries run against.
    pub graph: String,
    /// Timeout in seconds for HTTP requests
    pub timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:3000".to_string(),
            username: "default".to_string(),
            password: String::new(),
            graph: "canvas".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Connection settings for exactly one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Bolt(BoltConfig),
    Streaming(StreamingConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Bolt(_) => BackendKind::Transactional,
            BackendConfig::Streaming(_) => BackendKind::Streaming,
        }
    }

    /// Identity the registry compares to decide whether to replace the live adapter.
    pub fn identity(&self) -> String {
        match self {
            BackendConfig::Bolt(c) => format!(
                "bolt|{}|{}|{}",
                c.uri,
                c.username,
                c.database.as_deref().unwrap_or_default()
            ),
            BackendConfig::Streaming(c) => {
                format!("streaming|{}|{}|{}", c.service_url.trim_end_matches('/'), c.username, c.graph)
            }
        }
    }

    /// Bound applied to connection tests and health checks.
    pub fn probe_timeout(&self) -> Duration {
        match self {
            BackendConfig::Bolt(c) => c.connection_timeout,
            BackendConfig::Streaming(c) => Duration::from_secs(c.timeout_secs),
        }
    }

    /// Loads settings from the environment (and a `.env` file if present).
    ///
    /// `CANVAS_BACKEND` selects `bolt` (default) or `streaming`.
    pub fn from_env() -> Result<Self, AdapterError> {
        dotenv::dotenv().ok();

        let timeout_secs = match env::var("CANVAS_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                AdapterError::InvalidInput(format!("CANVAS_TIMEOUT_SECS is not a number: {}", raw))
            })?,
            Err(_) => 30,
        };

        match env::var("CANVAS_BACKEND").unwrap_or_else(|_| "bolt".to_string()).as_str() {
            "bolt" | "neo4j" => {
                let defaults = BoltConfig::default();
                Ok(BackendConfig::Bolt(BoltConfig {
                    uri: env::var("NEO4J_URI").unwrap_or(defaults.uri),
                    username: env::var("NEO4J_USERNAME").unwrap_or(defaults.username),
                    password: env::var("NEO4J_PASSWORD").unwrap_or(defaults.password),
                    database: env::var("NEO4J_DATABASE").ok(),
                    query_timeout: Duration::from_secs(timeout_secs),
                    ..defaults
                }))
            }
            "streaming" => {
                let defaults = StreamingConfig::default();
                Ok(BackendConfig::Streaming(StreamingConfig {
                    service_url: env::var("STREAMING_URL").unwrap_or(defaults.service_url),
                    username: env::var("STREAMING_USERNAME").unwrap_or(defaults.username),
                    password: env::var("STREAMING_PASSWORD").unwrap_or(defaults.password),
                    graph: env::var("STREAMING_GRAPH").unwrap_or(defaults.graph),
                    timeout_secs,
                }))
            }
            other => Err(AdapterError::InvalidInput(format!(
                "Unsupported CANVAS_BACKEND '{}', expected 'bolt' or 'streaming'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_ignores_password_and_trailing_slash() {
        let a = BackendConfig::Streaming(StreamingConfig {
            service_url: "http://db:3000/".into(),
            password: "one".into(),
            ..StreamingConfig::default()
        });
        let b = BackendConfig::Streaming(StreamingConfig {
            service_url: "http://db:3000".into(),
            password: "two".into(),
            ..StreamingConfig::default()
        });
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), BackendConfig::Bolt(BoltConfig::default()).identity());
    }

    #[test]
    fn test_config_is_tagged_by_backend() {
        let config = BackendConfig::Streaming(StreamingConfig::default());
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["backend"], json!("streaming"));
        assert_eq!(value["serviceUrl"], json!("http://localhost:3000"));

        let back: BackendConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), BackendKind::Streaming);
    }

    #[test]
    fn test_password_is_not_persisted() {
        let config = BackendConfig::Bolt(BoltConfig {
            password: "hunter2".into(),
            ..BoltConfig::default()
        });
        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("password").is_none());
        assert!(!value.to_string().contains("hunter2"));

        let BackendConfig::Bolt(back) = serde_json::from_value(value).unwrap() else {
            panic!("expected a bolt config");
        };
        assert_eq!(back.password, "");
        assert_eq!(back.uri, BoltConfig::default().uri);
    }
}
