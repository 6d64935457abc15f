use crate::error::{ConsumerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Client ID; generated when unset
    pub client_id: Option<String>,

    /// Consumer group
    pub group_id: Option<String>,

    /// Broker endpoints
    pub bootstrap_servers: Vec<String>,

    /// Default single-message consume timeout
    pub consume_timeout_ms: u64,

    /// Delay before polling again after a timed-out poll in the consume loop
    pub loop_sleep_delay_ms: u64,

    /// Lower bound applied to every timeout
    pub min_timeout_ms: u64,

    /// Default seek timeout
    pub seek_timeout_ms: u64,

    /// Default committed-offsets lookup timeout
    pub committed_timeout_ms: u64,

    /// How long stopping the consume loop waits for its last iteration
    pub loop_stop_timeout_ms: u64,

    /// Number of concurrently running background operations
    pub worker_threads: usize,

    /// Global client properties passed through to the underlying client
    pub properties: HashMap<String, String>,

    /// Default topic configuration
    pub topic_properties: Option<HashMap<String, String>>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            group_id: None,
            bootstrap_servers: vec!["localhost:9092".to_string()],
            consume_timeout_ms: 1000,
            loop_sleep_delay_ms: 500,
            min_timeout_ms: 10,
            seek_timeout_ms: 1000,
            committed_timeout_ms: 1000,
            loop_stop_timeout_ms: 5000,
            worker_threads: 4,
            properties: HashMap::new(),
            topic_properties: None,
        }
    }
}

impl ConsumerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ConsumerConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.is_empty() && !self.properties.contains_key("bootstrap.servers") {
            return Err(ConsumerError::Config(
                "bootstrap_servers cannot be empty".to_string(),
            ));
        }

        if let Some(group) = &self.group_id {
            if group.trim().is_empty() {
                return Err(ConsumerError::Config(
                    "group_id cannot be blank".to_string(),
                ));
            }
        }

        if self.min_timeout_ms == 0 {
            return Err(ConsumerError::Config(
                "min_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.worker_threads == 0 {
            return Err(ConsumerError::Config(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        if self.loop_stop_timeout_ms == 0 {
            return Err(ConsumerError::Config(
                "loop_stop_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Client ID, generating one when none is configured.
    pub fn resolved_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("rustmq-consumer-{}", Uuid::new_v4()))
    }

    /// Property map handed to the client factory. Typed fields override
    /// anything set in `properties`.
    pub fn client_properties(&self) -> HashMap<String, String> {
        let mut props = self.properties.clone();

        if !self.bootstrap_servers.is_empty() {
            props.insert("bootstrap.servers".to_string(), self.bootstrap_servers.join(","));
        }
        if let Some(client_id) = &self.client_id {
            props.insert("client.id".to_string(), client_id.clone());
        }
        if let Some(group_id) = &self.group_id {
            props.insert("group.id".to_string(), group_id.clone());
        }

        props
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Clamps `timeout` to the configured minimum.
    pub fn clamp_timeout(&self, timeout: Duration) -> Duration {
        timeout.max(self.min_timeout())
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }

    pub fn loop_sleep_delay(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_delay_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn committed_timeout(&self) -> Duration {
        Duration::from_millis(self.committed_timeout_ms)
    }

    pub fn loop_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_stop_timeout_ms)
    }
}
