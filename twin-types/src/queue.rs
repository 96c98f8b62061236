use serde::{Deserialize, Serialize};

/// Transport behind a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueueType {
    #[serde(rename = "dapr")]
    Dapr,
    #[serde(rename = "kafka.topic")]
    KafkaTopic,
    #[serde(rename = "kafka.topic.partition")]
    KafkaTopicPartition,
    /// In-process delivery
    #[default]
    #[serde(rename = "loopback")]
    Loopback,
}

/// Which side of the node consumes a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    #[default]
    Core,
    Dispatch,
}

/// Queue topology record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub queue_type: QueueType,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub consumers: Vec<String>,
    #[serde(default)]
    pub consumer_type: ConsumerType,
    #[serde(default)]
    pub description: String,
}

impl QueueInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_type_names() {
        let queue: QueueInfo =
            serde_json::from_str(r#"{"id": "q1", "type": "kafka.topic.partition"}"#).unwrap();
        assert_eq!(queue.queue_type, QueueType::KafkaTopicPartition);
        assert_eq!(queue.consumer_type, ConsumerType::Core);
        assert_eq!(QueueInfo::new("core-0").name, "core-0");
    }
}
