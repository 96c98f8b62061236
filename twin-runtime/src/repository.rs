//! Durable storage seam
//!
//! The runtime reads and writes entities, mapper definitions and queue
//! topology through [`Repository`]. Mapper and queue changes are observed
//! through broadcast watches so the environment and dispatcher can
//! reconfigure without a restart.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use twin_types::{Entity, MapperDef, QueueInfo, WatchEvent};

use crate::error::RepositoryError;

/// Buffered watch events per subscriber
pub const WATCH_CAPACITY: usize = 256;

/// Storage of entities, mappers and queues
#[async_trait]
pub trait Repository: Send + Sync {
    async fn put_entity(&self, entity: &Entity) -> Result<(), RepositoryError>;

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, RepositoryError>;

    async fn del_entity(&self, id: &str) -> Result<(), RepositoryError>;

    /// Every stored entity, ordered by id
    async fn range_entities(&self) -> Result<Vec<Entity>, RepositoryError>;

    async fn put_mapper(&self, def: &MapperDef) -> Result<(), RepositoryError>;

    async fn del_mapper(&self, def: &MapperDef) -> Result<(), RepositoryError>;

    async fn range_mappers(&self) -> Result<Vec<MapperDef>, RepositoryError>;

    /// Subscribe to mapper PUT/DELETE events
    fn watch_mappers(&self) -> broadcast::Receiver<WatchEvent<MapperDef>>;

    async fn put_queue(&self, queue: &QueueInfo) -> Result<(), RepositoryError>;

    async fn del_queue(&self, id: &str) -> Result<(), RepositoryError>;

    async fn range_queues(&self) -> Result<Vec<QueueInfo>, RepositoryError>;

    /// Subscribe to queue topology events
    fn watch_queues(&self) -> broadcast::Receiver<WatchEvent<QueueInfo>>;
}

/// In-process repository
///
/// Entities are kept as encoded JSON so reads hand out independent copies,
/// the same as a remote store would.
pub struct MemoryRepository {
    entities: RwLock<BTreeMap<String, Vec<u8>>>,
    /// storage key -> definition
    mappers: RwLock<BTreeMap<String, MapperDef>>,
    queues: RwLock<BTreeMap<String, QueueInfo>>,
    mapper_tx: broadcast::Sender<WatchEvent<MapperDef>>,
    queue_tx: broadcast::Sender<WatchEvent<QueueInfo>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        let (mapper_tx, _) = broadcast::channel(WATCH_CAPACITY);
        let (queue_tx, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            entities: RwLock::new(BTreeMap::new()),
            mappers: RwLock::new(BTreeMap::new()),
            queues: RwLock::new(BTreeMap::new()),
            mapper_tx,
            queue_tx,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn put_entity(&self, entity: &Entity) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(entity)?;
        self.entities.write().insert(entity.id.clone(), bytes);
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, RepositoryError> {
        let entities = self.entities.read();
        match entities.get(id) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    async fn del_entity(&self, id: &str) -> Result<(), RepositoryError> {
        self.entities.write().remove(id);
        Ok(())
    }

    async fn range_entities(&self) -> Result<Vec<Entity>, RepositoryError> {
        let entities = self.entities.read();
        let mut out = Vec::with_capacity(entities.len());
        for bytes in entities.values() {
            out.push(serde_json::from_slice(bytes)?);
        }
        Ok(out)
    }

    async fn put_mapper(&self, def: &MapperDef) -> Result<(), RepositoryError> {
        self.mappers.write().insert(def.storage_key(), def.clone());
        // No subscriber is not an error.
        let _ = self.mapper_tx.send(WatchEvent::Put(def.clone()));
        Ok(())
    }

    async fn del_mapper(&self, def: &MapperDef) -> Result<(), RepositoryError> {
        let removed = self.mappers.write().remove(&def.storage_key());
        if let Some(stored) = removed {
            let _ = self.mapper_tx.send(WatchEvent::Delete(stored));
        }
        Ok(())
    }

    async fn range_mappers(&self) -> Result<Vec<MapperDef>, RepositoryError> {
        Ok(self.mappers.read().values().cloned().collect())
    }

    fn watch_mappers(&self) -> broadcast::Receiver<WatchEvent<MapperDef>> {
        self.mapper_tx.subscribe()
    }

    async fn put_queue(&self, queue: &QueueInfo) -> Result<(), RepositoryError> {
        self.queues.write().insert(queue.id.clone(), queue.clone());
        let _ = self.queue_tx.send(WatchEvent::Put(queue.clone()));
        Ok(())
    }

    async fn del_queue(&self, id: &str) -> Result<(), RepositoryError> {
        let removed = self.queues.write().remove(id);
        if let Some(stored) = removed {
            let _ = self.queue_tx.send(WatchEvent::Delete(stored));
        }
        Ok(())
    }

    async fn range_queues(&self) -> Result<Vec<QueueInfo>, RepositoryError> {
        Ok(self.queues.read().values().cloned().collect())
    }

    fn watch_queues(&self) -> broadcast::Receiver<WatchEvent<QueueInfo>> {
        self.queue_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_entity_crud() {
        let repo = MemoryRepository::new();
        let mut entity = Entity::new("device1").with_type("device");
        entity.properties.insert("temp".into(), json!(21.5));

        repo.put_entity(&entity).await.unwrap();
        assert_eq!(repo.get_entity("device1").await.unwrap(), Some(entity));
        assert_eq!(repo.range_entities().await.unwrap().len(), 1);

        repo.del_entity("device1").await.unwrap();
        assert!(repo.get_entity("device1").await.unwrap().is_none());
        assert_eq!(repo.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_mapper_watch() {
        let repo = MemoryRepository::new();
        let mut watch = repo.watch_mappers();
        let def = MapperDef::new("m1", "a", "insert into a select b.x as x");

        repo.put_mapper(&def).await.unwrap();
        repo.del_mapper(&def).await.unwrap();
        // deleting twice emits nothing
        repo.del_mapper(&def).await.unwrap();

        assert_eq!(watch.recv().await.unwrap(), WatchEvent::Put(def.clone()));
        assert_eq!(watch.recv().await.unwrap(), WatchEvent::Delete(def));
        assert!(watch.try_recv().is_err());
        assert!(repo.range_mappers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_watch() {
        let repo = MemoryRepository::new();
        let mut watch = repo.watch_queues();
        repo.put_queue(&QueueInfo::new("core-1")).await.unwrap();
        repo.del_queue("core-1").await.unwrap();

        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Put(q) if q.id == "core-1"));
        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Delete(q) if q.id == "core-1"));
    }
}
