//! Cross-actor message dispatch
//!
//! The dispatcher owns one pub/sub connection per queue:
//!
//! - `core` queues are downstreams. They join the placement ring, outbound
//!   events are sent to the one owning the target entity, and this node's
//!   consumer receives from them.
//! - `dispatch` queues are upstreams. Events received there are re-placed
//!   and forwarded to the owning downstream, tagged with the upstream id as
//!   their channel when they carry none.
//!
//! Queue topology changes rebuild the affected connections in place.

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twin_types::{ConsumerType, QueueInfo, WatchEvent};

use crate::actor::{
    Headers, Message, MessageContext, MessageRouter, HEADER_CHANNEL, HEADER_OWNER, HEADER_PARTITION, HEADER_SENDER,
    HEADER_SOURCE, HEADER_TARGET, HEADER_TYPE,
};
use crate::error::DispatchError;
use crate::placement::Placement;
use crate::pubsub::{
    Event, EventHandler, PubSub, PubSubFactory, ATTR_CHANNEL_ID, ATTR_ENTITY_ID, ATTR_ENTITY_TYPE, ATTR_OWNER,
    ATTR_PARTITION_ID, ATTR_SENDER_ID, ATTR_SOURCE,
};
use crate::repository::Repository;

/// Header key <-> event attribute
const HEADER_ATTRS: [(&str, &str); 7] = [
    (HEADER_TARGET, ATTR_ENTITY_ID),
    (HEADER_TYPE, ATTR_ENTITY_TYPE),
    (HEADER_OWNER, ATTR_OWNER),
    (HEADER_SOURCE, ATTR_SOURCE),
    (HEADER_SENDER, ATTR_SENDER_ID),
    (HEADER_CHANNEL, ATTR_CHANNEL_ID),
    (HEADER_PARTITION, ATTR_PARTITION_ID),
];

/// Encode a message context as a transport event
pub fn encode(ctx: &MessageContext) -> Result<Event, DispatchError> {
    if ctx.target().is_none() {
        return Err(DispatchError::MissingAttribute(ATTR_ENTITY_ID));
    }
    if ctx.promise.is_some() {
        debug!(target = ?ctx.target(), "promise does not cross the transport");
    }

    let mut event = Event::new(serde_json::to_vec(&ctx.message)?);
    for (header, attr) in HEADER_ATTRS {
        if let Some(value) = ctx.headers.get(header) {
            event.set_attr(attr, value);
        }
    }
    Ok(event)
}

/// Decode a transport event back into a message context
pub fn decode(event: &Event) -> Result<MessageContext, DispatchError> {
    if event.entity().is_none() {
        return Err(DispatchError::MissingAttribute(ATTR_ENTITY_ID));
    }
    let message: Message = serde_json::from_slice(&event.data)?;
    let mut headers = Headers::new();
    for (header, attr) in HEADER_ATTRS {
        if let Some(value) = event.attr(attr) {
            headers.set(header, value);
        }
    }
    Ok(MessageContext::new(headers, message))
}

pub struct Dispatcher {
    placement: Arc<Placement>,
    factory: Arc<dyn PubSubFactory>,
    downstreams: RwLock<HashMap<String, Arc<dyn PubSub>>>,
    upstreams: RwLock<HashMap<String, Arc<dyn PubSub>>>,
    /// Receives events from downstream queues
    consumer: RwLock<Option<EventHandler>>,
}

impl Dispatcher {
    pub fn new(placement: Arc<Placement>, factory: Arc<dyn PubSubFactory>) -> Self {
        Self {
            placement,
            factory,
            downstreams: RwLock::new(HashMap::new()),
            upstreams: RwLock::new(HashMap::new()),
            consumer: RwLock::new(None),
        }
    }

    pub fn placement(&self) -> &Arc<Placement> {
        &self.placement
    }

    pub fn downstream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.downstreams.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn upstream(&self, id: &str) -> Option<Arc<dyn PubSub>> {
        self.upstreams.read().get(id).cloned()
    }

    /// Install the handler that consumes downstream queues
    pub async fn set_consumer(&self, handler: EventHandler) -> Result<(), DispatchError> {
        *self.consumer.write() = Some(handler.clone());
        let downstreams: Vec<Arc<dyn PubSub>> = self.downstreams.read().values().cloned().collect();
        for downstream in downstreams {
            downstream.received(handler.clone()).await?;
        }
        Ok(())
    }

    pub async fn load_queues(self: &Arc<Self>, queues: &[QueueInfo]) -> Result<(), DispatchError> {
        for queue in queues {
            self.apply_queue_event(&WatchEvent::Put(queue.clone())).await?;
        }
        Ok(())
    }

    /// Open, replace or close the connection of one queue
    pub async fn apply_queue_event(self: &Arc<Self>, event: &WatchEvent<QueueInfo>) -> Result<(), DispatchError> {
        let queue = event.value();
        self.detach_queue(&queue.id).await;

        let WatchEvent::Put(queue) = event else {
            info!(queue_id = %queue.id, "queue removed");
            return Ok(());
        };

        let pubsub = self.factory.open(queue)?;
        match queue.consumer_type {
            ConsumerType::Core => {
                let consumer = self.consumer.read().clone();
                if let Some(handler) = consumer {
                    pubsub.received(handler).await?;
                }
                self.downstreams.write().insert(queue.id.clone(), pubsub);
                self.placement.append(queue.clone());
                info!(queue_id = %queue.id, queue_type = ?queue.queue_type, "downstream opened");
            }
            ConsumerType::Dispatch => {
                pubsub.received(self.upstream_handler(queue.id.clone())).await?;
                self.upstreams.write().insert(queue.id.clone(), pubsub);
                info!(queue_id = %queue.id, queue_type = ?queue.queue_type, "upstream opened");
            }
        }
        Ok(())
    }

    async fn detach_queue(&self, queue_id: &str) {
        self.placement.remove(queue_id);
        let down = self.downstreams.write().remove(queue_id);
        let up = self.upstreams.write().remove(queue_id);
        for pubsub in down.into_iter().chain(up) {
            if let Err(err) = pubsub.close().await {
                warn!(queue_id = %queue_id, error = %err, "close pubsub");
            }
        }
    }

    fn upstream_handler(self: &Arc<Self>, queue_id: String) -> EventHandler {
        let dispatcher = Arc::downgrade(self);
        Arc::new(move |mut event: Event| {
            let dispatcher = dispatcher.clone();
            let queue_id = queue_id.clone();
            async move {
                let dispatcher = dispatcher
                    .upgrade()
                    .ok_or_else(|| DispatchError::Closed(queue_id.clone()))?;
                if event.attr(ATTR_CHANNEL_ID).is_none() {
                    event.set_attr(ATTR_CHANNEL_ID, queue_id.as_str());
                }
                dispatcher.dispatch(event).await
            }
            .boxed()
        })
    }

    /// Keep the topology in sync with the repository
    pub fn watch_queues(self: &Arc<Self>, repository: Arc<dyn Repository>) -> JoinHandle<()> {
        let mut watch = repository.watch_queues();
        let dispatcher = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match watch.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "queue watch lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                if let Err(err) = dispatcher.apply_queue_event(&event).await {
                    error!(queue_id = %event.value().id, error = %err, "apply queue event");
                }
            }
            debug!("queue watch stopped");
        })
    }

    /// Send `event` to the downstream owning its entity.
    ///
    /// A `partition-id` attribute names the queue directly.
    pub async fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        let entity_id = event
            .entity()
            .ok_or(DispatchError::MissingAttribute(ATTR_ENTITY_ID))?
            .to_string();

        let queue_id = match event.attr(ATTR_PARTITION_ID) {
            Some(partition) => partition.to_string(),
            None => {
                self.placement
                    .select(&entity_id)
                    .ok_or_else(|| DispatchError::NoQueue(entity_id.clone()))?
                    .id
            }
        };

        let downstream = self
            .downstreams
            .read()
            .get(&queue_id)
            .cloned()
            .ok_or_else(|| DispatchError::DownstreamNotFound(queue_id.clone()))?;
        debug!(entity_id = %entity_id, queue_id = %queue_id, event_id = %event.id, "dispatch event");
        downstream.send(event).await
    }

    /// Close every connection
    pub async fn close(&self) {
        let ids: Vec<String> = self
            .downstreams
            .read()
            .keys()
            .chain(self.upstreams.read().keys())
            .cloned()
            .collect();
        for id in ids {
            self.detach_queue(&id).await;
        }
    }
}

#[async_trait]
impl MessageRouter for Dispatcher {
    async fn route(&self, ctx: MessageContext) -> Result<(), DispatchError> {
        let event = encode(&ctx)?;
        self.dispatch(event).await
    }

    fn pending(&self) -> usize {
        let streams: Vec<Arc<dyn PubSub>> = self
            .downstreams
            .read()
            .values()
            .chain(self.upstreams.read().values())
            .cloned()
            .collect();
        streams.iter().map(|s| s.pending()).sum()
    }
}
