//! Pub/sub transport seam and the in-process loopback transport

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use twin_types::{QueueInfo, QueueType};

use crate::error::DispatchError;

pub const ATTR_ENTITY_ID: &str = "entity-id";
pub const ATTR_ENTITY_TYPE: &str = "entity-type";
pub const ATTR_OWNER: &str = "owner";
pub const ATTR_SOURCE: &str = "source";
pub const ATTR_SENDER_ID: &str = "sender-id";
pub const ATTR_CHANNEL_ID: &str = "channel-id";
pub const ATTR_PARTITION_ID: &str = "partition-id";

/// Transport envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attributes: BTreeMap::new(),
            data,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Target entity id
    pub fn entity(&self) -> Option<&str> {
        self.attr(ATTR_ENTITY_ID)
    }
}

/// Callback invoked for every received event
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;

/// One pub/sub connection
#[async_trait]
pub trait PubSub: Send + Sync {
    fn id(&self) -> &str;

    async fn send(&self, event: Event) -> Result<(), DispatchError>;

    /// Start delivering received events to `handler`
    async fn received(&self, handler: EventHandler) -> Result<(), DispatchError>;

    async fn close(&self) -> Result<(), DispatchError>;

    /// Events sent but not yet handled
    fn pending(&self) -> usize {
        0
    }
}

/// Opens a connection for a queue record
pub trait PubSubFactory: Send + Sync {
    fn open(&self, queue: &QueueInfo) -> Result<Arc<dyn PubSub>, DispatchError>;
}

/// In-process transport backed by an unbounded channel
pub struct LoopbackPubSub {
    id: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    pending: Arc<AtomicUsize>,
}

impl LoopbackPubSub {
    pub fn new(id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PubSub for LoopbackPubSub {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, event: Event) -> Result<(), DispatchError> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| DispatchError::Closed(self.id.clone()))?;
        debug!(pubsub_id = %self.id, event_id = %event.id, "pubsub.loopback send");

        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatchError::Closed(self.id.clone()));
        }
        Ok(())
    }

    async fn received(&self, handler: EventHandler) -> Result<(), DispatchError> {
        let mut rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| DispatchError::AlreadyConsuming(self.id.clone()))?;
        info!(pubsub_id = %self.id, "pubsub.loopback start receive message");

        let id = self.id.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_id = event.id.clone();
                if let Err(err) = handler(event).await {
                    error!(pubsub_id = %id, event_id = %event_id, error = %err, "handle event");
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            debug!(pubsub_id = %id, "pubsub.loopback consumer stopped");
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), DispatchError> {
        info!(pubsub_id = %self.id, "pubsub.loopback close");
        // Dropping the sender ends the consumer once queued events drain.
        self.tx.lock().take();
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Opens loopback connections; other queue types are unsupported
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackFactory;

impl PubSubFactory for LoopbackFactory {
    fn open(&self, queue: &QueueInfo) -> Result<Arc<dyn PubSub>, DispatchError> {
        match queue.queue_type {
            QueueType::Loopback => Ok(Arc::new(LoopbackPubSub::new(queue.id.as_str()))),
            _ => Err(DispatchError::Unsupported(queue.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_loopback_delivers_in_order() {
        let pubsub = LoopbackPubSub::new("core-0");
        let (seen_tx, mut seen_rx) = unbounded_channel();
        let handler: EventHandler = Arc::new(move |event: Event| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(event.data);
                Ok::<(), DispatchError>(())
            }
            .boxed()
        });

        for i in 0..3u8 {
            pubsub.send(Event::new(vec![i])).await.unwrap();
        }
        assert_eq!(pubsub.pending(), 3);
        pubsub.received(handler.clone()).await.unwrap();
        assert!(matches!(
            pubsub.received(handler).await,
            Err(DispatchError::AlreadyConsuming(_))
        ));

        for i in 0..3u8 {
            let data = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(data, vec![i]);
        }
        tokio::task::yield_now().await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while pubsub.pending() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let pubsub = LoopbackPubSub::new("core-0");
        pubsub.close().await.unwrap();
        assert!(matches!(
            pubsub.send(Event::new(Vec::new())).await,
            Err(DispatchError::Closed(_))
        ));
    }

    #[test]
    fn test_factory_rejects_remote_transports() {
        let mut queue = QueueInfo::new("kafka-0");
        queue.queue_type = QueueType::KafkaTopic;
        assert!(matches!(
            LoopbackFactory.open(&queue),
            Err(DispatchError::Unsupported(_))
        ));
        assert_eq!(LoopbackFactory.open(&QueueInfo::new("core-0")).unwrap().id(), "core-0");
    }

    #[test]
    fn test_event_attributes() {
        let mut event = Event::new(b"{}".to_vec());
        event.set_attr(ATTR_ENTITY_ID, "device1");
        event.set_attr(ATTR_PARTITION_ID, "");
        assert_eq!(event.entity(), Some("device1"));
        assert_eq!(event.attr(ATTR_PARTITION_ID), None);
        assert_eq!(uuid::Uuid::parse_str(&event.id).unwrap().get_version_num(), 4);
    }
}
