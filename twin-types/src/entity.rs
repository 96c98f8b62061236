use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Properties;

/// Durable property document of one managed thing.
///
/// `version` grows on every externally visible mutation and `last_time`
/// holds the wall clock of that mutation in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub last_time: i64,
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Lifecycle status of an entity actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
    /// Terminal; the actor rejects messages and is evicted.
    Deleted,
}

impl EntityStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            EntityStatus::Active => 0,
            EntityStatus::Inactive => 1,
            EntityStatus::Deleted => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntityStatus::Active,
            1 => EntityStatus::Inactive,
            _ => EntityStatus::Deleted,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityStatus::Active => "active",
            EntityStatus::Inactive => "inactive",
            EntityStatus::Deleted => "deleted",
        };
        f.write_str(name)
    }
}
