//! Compiled reactive rules
//!
//! A [`Mapper`] wraps a compiled rule together with the tentacles needed to
//! feed it: one `Entity` tentacle per source entity, which tells that source
//! to forward the watched properties, and one `Mapper` tentacle carrying
//! every watched key, which re-executes the rule on the target.

mod tentacle;

pub use tentacle::{Tentacle, TentacleKind};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use twin_types::{CompiledTql, MapperDef, Node, TqlCompiler, WatchKey};

use crate::error::MapperError;

/// A compiled, immutable rule. Edits replace the whole mapper.
#[derive(Clone)]
pub struct Mapper {
    id: String,
    name: String,
    version: u64,
    compiled: Arc<dyn CompiledTql>,
    tentacles: Vec<Tentacle>,
}

impl Mapper {
    /// Compile a stored definition
    pub fn compile(
        def: &MapperDef,
        compiler: &dyn TqlCompiler,
        version: u64,
    ) -> Result<Self, MapperError> {
        let mapper_id = def.mapper_id();
        let compiled = compiler
            .compile(&def.tql)
            .map_err(|source| MapperError::Compile {
                mapper_id: mapper_id.clone(),
                source,
            })?;
        Ok(Self::new(mapper_id, def.name.clone(), compiled, version))
    }

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        compiled: Arc<dyn CompiledTql>,
        version: u64,
    ) -> Self {
        let id = id.into();
        let tentacles = build_tentacles(&id, compiled.as_ref(), version);
        Self {
            id,
            name: name.into(),
            version,
            compiled,
            tentacles,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rule text
    pub fn text(&self) -> &str {
        self.compiled.text()
    }

    pub fn target_entity(&self) -> &str {
        self.compiled.target()
    }

    pub fn source_entities(&self) -> Vec<String> {
        self.compiled.sources()
    }

    /// Entity tentacles (targeting their source) followed by the mapper tentacle
    pub fn tentacles(&self) -> &[Tentacle] {
        &self.tentacles
    }

    /// The tentacle whose items are this mapper's inputs
    pub fn mapper_tentacle(&self) -> Option<&Tentacle> {
        self.tentacles.iter().find(|t| t.is_mapper())
    }

    pub fn exec(&self, input: &BTreeMap<String, Node>) -> Result<BTreeMap<String, Node>, MapperError> {
        self.compiled.exec(input).map_err(|source| MapperError::Exec {
            mapper_id: self.id.clone(),
            source,
        })
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("id", &self.id)
            .field("target", &self.target_entity())
            .field("version", &self.version)
            .field("tql", &self.text())
            .finish()
    }
}

fn build_tentacles(mapper_id: &str, compiled: &dyn CompiledTql, version: u64) -> Vec<Tentacle> {
    let mut tentacles = Vec::new();
    let mut all_items = Vec::new();

    for config in compiled.tentacles() {
        let items: Vec<WatchKey> = config
            .property_keys
            .iter()
            .map(|key| WatchKey::new(config.source_entity.as_str(), key.as_str()))
            .collect();
        all_items.extend(items.iter().cloned());
        tentacles.push(Tentacle::new(
            format!("{}:entity:{}", mapper_id, config.source_entity),
            TentacleKind::Entity,
            config.source_entity,
            items,
            version,
        ));
    }

    tentacles.push(Tentacle::new(
        format!("{}:mapper", mapper_id),
        TentacleKind::Mapper,
        mapper_id,
        all_items,
        version,
    ));
    tentacles
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_tql::TqlEngine;

    #[test]
    fn test_mapper_tentacles() {
        let def = MapperDef::new(
            "m1",
            "device123",
            "insert into device123 select device234.temp as temp, device345.hum as hum",
        );
        let mapper = Mapper::compile(&def, &TqlEngine, 1).unwrap();
        assert_eq!(mapper.id(), "device123-m1");
        assert_eq!(mapper.target_entity(), "device123");
        assert_eq!(mapper.source_entities(), vec!["device234", "device345"]);

        let tentacles = mapper.tentacles();
        assert_eq!(tentacles.len(), 3);
        assert_eq!(tentacles[0].kind, TentacleKind::Entity);
        assert_eq!(tentacles[0].target_id, "device234");
        assert_eq!(tentacles[0].items, vec![WatchKey::new("device234", "temp")]);

        let mt = mapper.mapper_tentacle().unwrap();
        assert_eq!(mt.target_id, "device123-m1");
        assert_eq!(
            mt.items,
            vec![WatchKey::new("device234", "temp"), WatchKey::new("device345", "hum")]
        );
    }

    #[test]
    fn test_mapper_exec_and_errors() {
        let def = MapperDef::new("m1", "t", "insert into t select s.x * 2 as y");
        let mapper = Mapper::compile(&def, &TqlEngine, 1).unwrap();
        let mut input = BTreeMap::new();
        input.insert("s.x".to_string(), json!(21));
        assert_eq!(mapper.exec(&input).unwrap()["y"], json!(42));

        input.insert("s.x".to_string(), json!("nope"));
        assert!(matches!(mapper.exec(&input), Err(MapperError::Exec { .. })));

        let bad = MapperDef::new("m2", "t", "insert into");
        assert!(matches!(
            Mapper::compile(&bad, &TqlEngine, 1),
            Err(MapperError::Compile { .. })
        ));
    }
}
