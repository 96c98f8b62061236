//! Live mapper/tentacle registry
//!
//! The environment decides, per entity, which mappers and tentacles its
//! actor must hold. Installing a mapper places:
//!
//! - the mapper itself and its `Mapper` tentacle on the target entity,
//! - a copy of each `Entity` tentacle on the corresponding source entity,
//!   retargeted to deliver to the target.
//!
//! Every placement is recorded per mapper, so replacing or removing a
//! mapper removes exactly the edges it installed, wherever they live.
//! All mutations go through one write lock; actors read snapshots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use twin_types::{MapperDef, TqlCompiler, WatchEvent};

use crate::error::MapperError;
use crate::mapper::{Mapper, Tentacle, TentacleKind};

/// Snapshot of the rules one actor must load
#[derive(Debug, Clone, Default)]
pub struct ActorEnv {
    pub mappers: HashMap<String, Mapper>,
    pub tentacles: Vec<Tentacle>,
}

impl ActorEnv {
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty() && self.tentacles.is_empty()
    }
}

#[derive(Debug, Default)]
struct MapperCache {
    /// mapper id -> mapper
    mappers: HashMap<String, Mapper>,
    /// tentacle id -> tentacle
    tentacles: HashMap<String, Tentacle>,
}

impl MapperCache {
    fn is_empty(&self) -> bool {
        self.mappers.is_empty() && self.tentacles.is_empty()
    }
}

/// Where one mapper put things
#[derive(Debug)]
struct Registration {
    target: String,
    /// (entity id, tentacle id)
    placements: Vec<(String, String)>,
    /// Sorted, de-duplicated entity ids touched by the mapper
    entities: Vec<String>,
}

#[derive(Debug, Default)]
struct Registry {
    caches: HashMap<String, MapperCache>,
    registrations: HashMap<String, Registration>,
}

impl Registry {
    fn cache(&mut self, entity_id: &str) -> &mut MapperCache {
        self.caches.entry(entity_id.to_string()).or_default()
    }

    /// Undo every placement of `mapper_id`; returns the entities touched.
    fn clean(&mut self, mapper_id: &str) -> Vec<String> {
        let Some(registration) = self.registrations.remove(mapper_id) else {
            return Vec::new();
        };

        for (entity_id, tentacle_id) in &registration.placements {
            if let Some(cache) = self.caches.get_mut(entity_id) {
                cache.tentacles.remove(tentacle_id);
            }
        }
        if let Some(cache) = self.caches.get_mut(&registration.target) {
            cache.mappers.remove(mapper_id);
        }

        for entity_id in &registration.entities {
            if self.caches.get(entity_id).is_some_and(MapperCache::is_empty) {
                self.caches.remove(entity_id);
            }
        }
        registration.entities
    }

    fn install(&mut self, mapper: Mapper) -> Vec<String> {
        let mapper_id = mapper.id().to_string();
        let target = mapper.target_entity().to_string();
        let mut placements = Vec::new();
        let mut entities = vec![target.clone()];

        for tentacle in mapper.tentacles() {
            match tentacle.kind {
                TentacleKind::Entity => {
                    // Watched on the source, delivered to the target.
                    let remote = tentacle.target_id.clone();
                    let copy = tentacle.retarget(target.as_str());
                    info!(mapper_id = %mapper_id, source = %remote, target = %target, items = ?copy.items, "install entity tentacle");
                    placements.push((remote.clone(), copy.id.clone()));
                    self.cache(&remote).tentacles.insert(copy.id.clone(), copy);
                    entities.push(remote);
                }
                TentacleKind::Mapper => {
                    info!(mapper_id = %mapper_id, target = %target, items = ?tentacle.items, "install mapper tentacle");
                    placements.push((target.clone(), tentacle.id.clone()));
                    self.cache(&target)
                        .tentacles
                        .insert(tentacle.id.clone(), tentacle.clone());
                }
            }
        }

        self.cache(&target).mappers.insert(mapper_id.clone(), mapper);

        entities.sort();
        entities.dedup();
        self.registrations.insert(
            mapper_id,
            Registration {
                target,
                placements,
                entities: entities.clone(),
            },
        );
        entities
    }
}

/// Process-wide registry of mappers and tentacles
pub struct Environment {
    registry: RwLock<Registry>,
    compiler: Arc<dyn TqlCompiler>,
    next_version: AtomicU64,
}

impl Environment {
    pub fn new(compiler: Arc<dyn TqlCompiler>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            compiler,
            next_version: AtomicU64::new(1),
        }
    }

    pub fn compiler(&self) -> &Arc<dyn TqlCompiler> {
        &self.compiler
    }

    fn compile(&self, def: &MapperDef) -> Result<Mapper, MapperError> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        Mapper::compile(def, self.compiler.as_ref(), version)
    }

    /// Bulk-load definitions at startup.
    ///
    /// Definitions whose rule text fails to compile are logged and skipped;
    /// the loaded ones are returned.
    pub fn store_mappers(&self, defs: &[MapperDef]) -> Vec<MapperDef> {
        let mut loaded = Vec::with_capacity(defs.len());
        for def in defs {
            debug!(id = %def.id, entity_id = %def.entity_id, tql = %def.tql, "store mapper");
            match self.compile(def) {
                Ok(mapper) => {
                    self.add_mapper(mapper);
                    loaded.push(def.clone());
                }
                Err(err) => {
                    error!(id = %def.id, entity_id = %def.entity_id, error = %err, "parse mapper");
                }
            }
        }
        loaded
    }

    /// React to a repository change; returns entity ids whose actors must reload.
    pub fn on_mapper_changed(&self, event: &WatchEvent<MapperDef>) -> Result<Vec<String>, MapperError> {
        let effects = match event {
            WatchEvent::Put(def) => {
                debug!(id = %def.id, entity_id = %def.entity_id, tql = %def.tql, "mapper changed");
                let mapper = self.compile(def).inspect_err(|err| {
                    error!(id = %def.id, entity_id = %def.entity_id, error = %err, "parse mapper again");
                })?;
                self.add_mapper(mapper)
            }
            WatchEvent::Delete(def) => {
                debug!(id = %def.id, entity_id = %def.entity_id, "mapper removed");
                self.remove_mapper(&def.mapper_id())
            }
        };

        debug!(id = %event.value().id, effects = ?effects, "update environment");
        Ok(effects)
    }

    /// Install `mapper`, replacing any mapper with the same id.
    pub fn add_mapper(&self, mapper: Mapper) -> Vec<String> {
        let mut registry = self.registry.write();
        let mut effects = registry.clean(mapper.id());
        effects.extend(registry.install(mapper));
        effects.sort();
        effects.dedup();
        effects
    }

    /// Remove a mapper and every edge it installed.
    pub fn remove_mapper(&self, mapper_id: &str) -> Vec<String> {
        let mut registry = self.registry.write();
        if !registry.registrations.contains_key(mapper_id) {
            warn!(mapper_id = %mapper_id, "mapper not registered");
            return Vec::new();
        }
        registry.clean(mapper_id)
    }

    /// Copy of everything the actor for `entity_id` must load
    pub fn get_actor_env(&self, entity_id: &str) -> ActorEnv {
        let registry = self.registry.read();
        let Some(cache) = registry.caches.get(entity_id) else {
            return ActorEnv::default();
        };

        let mut tentacles: Vec<Tentacle> = cache.tentacles.values().cloned().collect();
        tentacles.sort_by(|a, b| a.id.cmp(&b.id));
        ActorEnv {
            mappers: cache.mappers.clone(),
            tentacles,
        }
    }

    /// Entities a mapper currently touches (reverse index)
    pub fn mapper_entities(&self, mapper_id: &str) -> Option<Vec<String>> {
        self.registry
            .read()
            .registrations
            .get(mapper_id)
            .map(|r| r.entities.clone())
    }

    pub fn mapper_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.read().registrations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of entities holding at least one mapper or tentacle
    pub fn cache_count(&self) -> usize {
        self.registry.read().caches.len()
    }
}
