//! Harness manifest data structures.

use crate::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How to reach one cluster node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    /// `user@host` for ssh; commands run locally when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationSpec {
    /// Connection string handed to every coordination tool, e.g. `zk1:2181,zk2:2181`.
    pub connect: String,
}

/// Declarative topic settings. The name is the key of the manifest's topic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "one")]
    pub partitions: u32,
    #[serde(default = "one", alias = "replication-factor")]
    pub replication_factor: u32,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            replication_factor: 1,
            configs: BTreeMap::new(),
        }
    }
}

fn one() -> u32 {
    1
}

/// A topic to create: name, partition count, replication factor, config overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    #[serde(flatten)]
    pub config: TopicConfig,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32) -> Self {
        Self {
            name: name.into(),
            config: TopicConfig {
                partitions,
                replication_factor,
                configs: BTreeMap::new(),
            },
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.configs.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |reason: &str| HarnessError::InvalidTopic {
            topic: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.config.partitions < 1 {
            return Err(invalid("partition count must be at least 1"));
        }
        if self.config.replication_factor < 1 {
            return Err(invalid("replication factor must be at least 1"));
        }
        Ok(())
    }
}

/// Paths, ports and timings used by the harness. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub kafka_home: String,
    pub broker_port: u16,
    pub broker_root: String,
    pub consumer_root: String,
    pub start_settle_ms: u64,
    pub topic_settle_ms: u64,
    pub stop_timeout_ms: u64,
    pub stop_backoff_ms: u64,
    pub consumer_process_pattern: String,
    pub reassign_dir: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            kafka_home: "/opt/kafka".to_string(),
            broker_port: 9092,
            broker_root: "/mnt/kafka".to_string(),
            consumer_root: "/mnt/console_consumer".to_string(),
            start_settle_ms: 5000,
            topic_settle_ms: 1000,
            stop_timeout_ms: 10_000,
            stop_backoff_ms: 200,
            consumer_process_pattern: "console_consumer".to_string(),
            reassign_dir: "/tmp".to_string(),
        }
    }
}

impl HarnessSettings {
    /// Settings with every delay set to zero and short stop waits, for scripted nodes.
    pub fn immediate() -> Self {
        Self {
            start_settle_ms: 0,
            topic_settle_ms: 0,
            stop_timeout_ms: 500,
            stop_backoff_ms: 10,
            ..Self::default()
        }
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_millis(self.start_settle_ms)
    }

    pub fn topic_settle(&self) -> Duration {
        Duration::from_millis(self.topic_settle_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_backoff(&self) -> Duration {
        Duration::from_millis(self.stop_backoff_ms)
    }

    /// Path of a coordination/broker tool under the installation root.
    pub fn tool(&self, script: &str) -> String {
        format!("{}/bin/{script}", self.kafka_home.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessManifest {
    pub coordination: CoordinationSpec,
    pub nodes: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<BTreeMap<String, TopicConfig>>,
    #[serde(default)]
    pub settings: HarnessSettings,
}

impl HarnessManifest {
    /// Topic set in creation order.
    pub fn topic_specs(&self) -> Vec<TopicSpec> {
        self.topics
            .iter()
            .flatten()
            .map(|(name, config)| TopicSpec {
                name: name.clone(),
                config: config.clone(),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.nodes.is_empty() {
            return Err(HarnessError::InvalidManifest {
                context: "nodes".to_string(),
                reason: "at least one node is required".to_string(),
            });
        }
        if self.coordination.connect.trim().is_empty() {
            return Err(HarnessError::InvalidManifest {
                context: "coordination".to_string(),
                reason: "connect string must not be empty".to_string(),
            });
        }
        for topic in self.topic_specs() {
            topic.validate()?;
        }
        Ok(())
    }
}
