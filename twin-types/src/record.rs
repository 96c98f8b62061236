use serde::{Deserialize, Serialize};

/// Stored mapper definition, as kept by the repository
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapperDef {
    pub id: String,
    pub tql: String,
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl MapperDef {
    pub fn new(id: impl Into<String>, entity_id: impl Into<String>, tql: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tql: tql.into(),
            entity_id: entity_id.into(),
            ..Default::default()
        }
    }

    /// Runtime id: `{entity_id}-{id}`
    pub fn mapper_id(&self) -> String {
        format!("{}-{}", self.entity_id, self.id)
    }

    /// Storage key: `core.mapper.{type}.{entity}.{name}`
    pub fn storage_key(&self) -> String {
        format!(
            "core.mapper.{}.{}.{}",
            self.entity_type, self.entity_id, self.name
        )
    }
}

/// Change notification from a repository watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "UPPERCASE")]
pub enum WatchEvent<T> {
    Put(T),
    Delete(T),
}

impl<T> WatchEvent<T> {
    pub fn value(&self) -> &T {
        match self {
            WatchEvent::Put(v) | WatchEvent::Delete(v) => v,
        }
    }
}
