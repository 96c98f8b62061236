use serde::{Deserialize, Serialize};
use std::fmt;
use twin_types::WatchKey;

/// What a tentacle delivers to when one of its items changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TentacleKind {
    /// Send the changed properties to entity `target_id`
    Entity,
    /// Re-execute mapper `target_id`
    Mapper,
}

impl fmt::Display for TentacleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TentacleKind::Entity => f.write_str("entity"),
            TentacleKind::Mapper => f.write_str("mapper"),
        }
    }
}

/// Subscription of one target to a set of watch keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tentacle {
    pub id: String,
    pub kind: TentacleKind,
    pub target_id: String,
    pub items: Vec<WatchKey>,
    pub version: u64,
}

impl Tentacle {
    pub fn new(
        id: impl Into<String>,
        kind: TentacleKind,
        target_id: impl Into<String>,
        items: Vec<WatchKey>,
        version: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            target_id: target_id.into(),
            items,
            version,
        }
    }

    /// Copy of this tentacle delivering to `target_id` instead
    pub fn retarget(&self, target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            ..self.clone()
        }
    }

    pub fn is_mapper(&self) -> bool {
        self.kind == TentacleKind::Mapper
    }
}
