//! Actor messages and their envelope

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::oneshot;
use twin_types::{Entity, PatchOperator, Properties};

pub const HEADER_SOURCE: &str = "x-source";
/// Entity that emitted a propagated message
pub const HEADER_SENDER: &str = "x-sender";
pub const HEADER_TARGET: &str = "x-target";
pub const HEADER_OWNER: &str = "x-owner";
pub const HEADER_TYPE: &str = "x-type";
pub const HEADER_CHANNEL: &str = "x-channel-id";
pub const HEADER_PARTITION: &str = "x-partition-id";

/// Property update addressed to one actor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMessage {
    /// Entity whose properties these are; absent means the receiving entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    #[serde(default)]
    pub operator: PatchOperator,
    /// path -> value
    #[serde(default)]
    pub properties: Properties,
}

impl PropertyMessage {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            ..Default::default()
        }
    }

    pub fn with_state_id(mut self, state_id: impl Into<String>) -> Self {
        self.state_id = Some(state_id.into());
        self
    }

    pub fn with_operator(mut self, operator: PatchOperator) -> Self {
        self.operator = operator;
        self
    }
}

/// Everything an actor's mailbox can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Property(PropertyMessage),
    /// Property update followed by an immediate flush
    Flush(PropertyMessage),
    /// Terminal; the entity is removed from storage
    Delete,
}

impl Message {
    pub fn property(&self) -> Option<&PropertyMessage> {
        match self {
            Message::Property(msg) | Message::Flush(msg) => Some(msg),
            Message::Delete => None,
        }
    }
}

/// Envelope headers (`x-*` keys)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.get(HEADER_SOURCE)
    }

    pub fn sender(&self) -> Option<&str> {
        self.get(HEADER_SENDER)
    }

    pub fn target(&self) -> Option<&str> {
        self.get(HEADER_TARGET)
    }

    pub fn owner(&self) -> Option<&str> {
        self.get(HEADER_OWNER)
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.get(HEADER_TYPE)
    }

    pub fn channel(&self) -> Option<&str> {
        self.get(HEADER_CHANNEL)
    }

    pub fn partition(&self) -> Option<&str> {
        self.get(HEADER_PARTITION)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// A message plus routing headers and an optional completion promise
pub struct MessageContext {
    pub headers: Headers,
    pub message: Message,
    /// Resolved with the entity snapshot once the message is processed
    pub promise: Option<oneshot::Sender<Entity>>,
}

impl MessageContext {
    pub fn new(headers: Headers, message: Message) -> Self {
        Self {
            headers,
            message,
            promise: None,
        }
    }

    /// Property message for `target`
    pub fn property(target: impl Into<String>, msg: PropertyMessage) -> Self {
        Self::new(
            Headers::new().with(HEADER_TARGET, target),
            Message::Property(msg),
        )
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Headers::new().with(HEADER_TARGET, target), Message::Delete)
    }

    /// Attach a promise and return its receiving half
    pub fn with_promise(mut self) -> (Self, oneshot::Receiver<Entity>) {
        let (tx, rx) = oneshot::channel();
        self.promise = Some(tx);
        (self, rx)
    }

    pub fn target(&self) -> Option<&str> {
        self.headers.target()
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("headers", &self.headers)
            .field("message", &self.message)
            .field("promised", &self.promise.is_some())
            .finish()
    }
}
