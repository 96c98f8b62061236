//! Per-entity runtime state
//!
//! The state owns the entity document, cached copies of the properties other
//! entities have sent, and the mapper/tentacle index loaded from the
//! environment. It is only ever touched by the worker currently attached to
//! the actor.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, error, warn};
use twin_types::{Entity, Node, PatchOperator, Properties, WatchKey};

use super::message::{Message, PropertyMessage};
use crate::environment::ActorEnv;
use crate::error::{ActorError, PatchError};
use crate::mapper::{Mapper, Tentacle};
use crate::patch;

/// Turns one message into the watch keys it changed
pub trait MessageHandler: Send + Sync {
    fn handle(&self, state: &mut ActorState, message: &Message) -> Result<Vec<WatchKey>, ActorError>;
}

/// Applies property messages to the state
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyHandler;

impl MessageHandler for PropertyHandler {
    fn handle(&self, state: &mut ActorState, message: &Message) -> Result<Vec<WatchKey>, ActorError> {
        match message.property() {
            Some(msg) => Ok(state.invoke_property_message(msg)),
            None => Err(ActorError::Handler(format!(
                "unexpected message for {}: {:?}",
                state.id(),
                message
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActorState {
    pub(super) entity: Entity,
    /// entity id -> properties received from that entity
    pub(super) cache_props: HashMap<String, Properties>,
    /// mapper id -> mapper
    pub(super) mappers: HashMap<String, Mapper>,
    /// watch key string -> tentacles keyed on it
    pub(super) tentacles: HashMap<String, Vec<Tentacle>>,
}

impl ActorState {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            cache_props: HashMap::new(),
            mappers: HashMap::new(),
            tentacles: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.entity.id
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn mappers(&self) -> &HashMap<String, Mapper> {
        &self.mappers
    }

    /// Tentacles keyed on `key`
    pub fn tentacles(&self, key: &WatchKey) -> &[Tentacle] {
        self.tentacles
            .get(&key.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cached(&self, entity_id: &str) -> Option<&Properties> {
        self.cache_props.get(entity_id)
    }

    /// Replace the mapper/tentacle index with a fresh environment snapshot
    pub fn load_env(&mut self, env: ActorEnv) {
        let mut tentacles: HashMap<String, Vec<Tentacle>> = HashMap::new();
        for tentacle in env.tentacles {
            for item in &tentacle.items {
                tentacles
                    .entry(item.to_string())
                    .or_default()
                    .push(tentacle.clone());
            }
        }

        debug!(
            entity_id = %self.entity.id,
            mappers = env.mappers.len(),
            watch_keys = tentacles.len(),
            "load environment"
        );
        self.mappers = env.mappers;
        self.tentacles = tentacles;
    }

    /// Property document of `entity_id` as seen by this actor
    pub fn document(&self, entity_id: &str) -> Option<&Properties> {
        if entity_id == self.entity.id {
            Some(&self.entity.properties)
        } else {
            self.cache_props.get(entity_id)
        }
    }

    /// Read `path` of `entity_id` (the `copy` operator)
    pub fn property(&self, entity_id: &str, path: &str) -> Result<Node, PatchError> {
        let doc = self
            .document(entity_id)
            .ok_or_else(|| PatchError::PropertyNotFound(format!("{}.{}", entity_id, path)))?;
        patch::get(doc, path)
    }

    /// Apply a property message; returns the watch keys it changed.
    ///
    /// Failing paths are logged and skipped so the rest of the message still
    /// applies.
    pub fn invoke_property_message(&mut self, msg: &PropertyMessage) -> Vec<WatchKey> {
        let state_id = match msg.state_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.entity.id.clone(),
        };
        let is_self = state_id == self.entity.id;

        let doc = if is_self {
            &mut self.entity.properties
        } else {
            self.cache_props.entry(state_id.clone()).or_default()
        };

        let mut watch_keys = Vec::new();
        for (path, value) in &msg.properties {
            match patch::patch(doc, path, msg.operator, Some(value)) {
                Ok(_) => watch_keys.extend(
                    patch::watch_paths(path, msg.operator, Some(value))
                        .into_iter()
                        .map(|p| WatchKey::new(state_id.as_str(), p)),
                ),
                Err(err) => {
                    error!(entity_id = %self.entity.id, state_id = %state_id, path = %path, error = %err, "set state property");
                }
            }
        }

        if is_self && msg.operator.is_mutating() && !watch_keys.is_empty() {
            self.touch();
        }
        watch_keys
    }

    /// Write one property of the own entity with `replace`
    pub fn set_property(&mut self, path: &str, value: Node) -> Result<(), PatchError> {
        patch::patch(&mut self.entity.properties, path, PatchOperator::Replace, Some(&value))?;
        self.touch();
        Ok(())
    }

    /// Record an externally visible mutation
    pub(super) fn touch(&mut self) {
        self.entity.version += 1;
        let now = Utc::now().timestamp_millis();
        if now < self.entity.last_time {
            warn!(entity_id = %self.entity.id, last_time = self.entity.last_time, now, "clock moved backwards");
        }
        self.entity.last_time = now.max(self.entity.last_time);
    }
}
