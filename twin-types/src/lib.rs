//! Shared types for the twin entity runtime
//!
//! This crate provides the data model used across the workspace: property
//! values, watch keys, entity documents, mapper and queue records, and the
//! seam through which rule text is compiled into executable mappers.

use serde::{Deserialize, Serialize};
use std::fmt;

mod entity;
mod operator;
mod queue;
mod record;
pub mod tql;

pub use entity::{Entity, EntityStatus};
pub use operator::{OperatorError, PatchOperator};
pub use queue::{ConsumerType, QueueInfo, QueueType};
pub use record::{MapperDef, WatchEvent};
pub use tql::{CompiledTql, TentacleConfig, TqlCompiler, TqlError};

/// A property value.
///
/// Nodes cover null, bool, integer, float, string and raw JSON
/// objects/arrays, which is exactly the value space of `serde_json`.
pub type Node = serde_json::Value;

/// A property document: top-level property name to value.
pub type Properties = serde_json::Map<String, Node>;

/// Separator between the entity id and the property key.
pub const WATCH_KEY_DELIMITER: char = '.';

/// Property key that matches any property of an entity.
pub const WILDCARD: &str = "*";

/// Address of one property of one entity in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    pub entity_id: String,
    pub property_key: String,
}

impl WatchKey {
    pub fn new(entity_id: impl Into<String>, property_key: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            property_key: property_key.into(),
        }
    }

    /// The `entity.*` key matching every property of `entity_id`
    pub fn wildcard(entity_id: impl Into<String>) -> Self {
        Self::new(entity_id, WILDCARD)
    }

    pub fn is_wildcard(&self) -> bool {
        self.property_key == WILDCARD
    }

    /// Parse `entity.path` at the first delimiter.
    ///
    /// Returns `None` when either side is empty.
    pub fn parse(text: &str) -> Option<Self> {
        let (entity_id, property_key) = text.split_once(WATCH_KEY_DELIMITER)?;
        if entity_id.is_empty() || property_key.is_empty() {
            return None;
        }
        Some(Self::new(entity_id, property_key))
    }

    /// First segment of the property path (`a` for `a.b[0]`)
    pub fn root_property(&self) -> &str {
        let end = self
            .property_key
            .find(['.', '['])
            .unwrap_or(self.property_key.len());
        &self.property_key[..end]
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_id, WATCH_KEY_DELIMITER, self.property_key)
    }
}
