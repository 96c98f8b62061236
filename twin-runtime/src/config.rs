//! Node configuration parsing

use serde::{Deserialize, Serialize};
use std::path::Path;
use twin_types::{ConsumerType, QueueInfo, QueueType};

use crate::error::ConfigError;
use crate::mailbox;

/// Top-level configuration, as read from `twin.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub actor: ActorConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Container used when a message names no channel
    #[serde(default = "default_channel")]
    pub default_channel: String,

    /// Queue topology loaded at startup
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueInfo>,
}

/// Per-actor tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Flush after this many consumed messages
    #[serde(default = "default_flush_period")]
    pub flush_period: usize,

    /// Empty-mailbox polls before the loop detaches
    #[serde(default = "default_ensure_consume_retries")]
    pub ensure_consume_retries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrently running actor loops
    #[serde(default = "default_pool_size")]
    pub size: usize,
}

fn default_mailbox_capacity() -> usize {
    mailbox::DEFAULT_CAPACITY
}

fn default_flush_period() -> usize {
    10
}

fn default_ensure_consume_retries() -> usize {
    3
}

fn default_pool_size() -> usize {
    256
}

fn default_channel() -> String {
    String::from("default")
}

fn default_queues() -> Vec<QueueInfo> {
    vec![QueueInfo {
        queue_type: QueueType::Loopback,
        consumer_type: ConsumerType::Core,
        ..QueueInfo::new("core-0")
    }]
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            flush_period: default_flush_period(),
            ensure_consume_retries: default_ensure_consume_retries(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            actor: ActorConfig::default(),
            pool: PoolConfig::default(),
            default_channel: default_channel(),
            queues: default_queues(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actor.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("actor.mailbox_capacity must be > 0".into()));
        }
        if self.actor.flush_period == 0 {
            return Err(ConfigError::Invalid("actor.flush_period must be > 0".into()));
        }
        if self.pool.size == 0 {
            return Err(ConfigError::Invalid("pool.size must be > 0".into()));
        }
        if self.default_channel.is_empty() {
            return Err(ConfigError::Invalid("default_channel must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.actor.mailbox_capacity, 10);
        assert_eq!(config.actor.flush_period, 10);
        assert_eq!(config.actor.ensure_consume_retries, 3);
        assert_eq!(config.pool.size, 256);
        assert_eq!(config.default_channel, "default");
        assert_eq!(config.queues.len(), 1);
        assert_eq!(config.queues[0].id, "core-0");
        assert_eq!(config.queues[0].queue_type, QueueType::Loopback);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
actor:
  mailbox_capacity: 64
pool:
  size: 4
queues:
  - id: core-a
  - id: core-b
    type: loopback
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.actor.mailbox_capacity, 64);
        assert_eq!(config.actor.flush_period, 10);
        assert_eq!(config.pool.size, 4);
        let ids: Vec<_> = config.queues.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["core-a", "core-b"]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_yaml("pool:\n  size: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("actor: [1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_channel: plant-a").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.default_channel, "plant-a");

        assert!(matches!(
            Config::from_file("/definitely/missing/twin.yml"),
            Err(ConfigError::Read(_))
        ));
    }
}
