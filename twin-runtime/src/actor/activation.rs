//! Tentacle activation
//!
//! Given the watch keys changed by one message, decide which entities must
//! receive which properties and which local mappers must run. Both lookups
//! try the exact `entity.path` key first and fall back to `entity.*`.
//!
//! Propagation is one hop: outbound messages are handed to the router and
//! mapper outputs are written back without being activated again.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, warn};
use twin_types::{Node, Properties, WatchKey};

use super::state::ActorState;
use crate::mapper::{Tentacle, TentacleKind};

/// What one batch of watch keys activated
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Activation {
    /// target entity -> properties to send, one message per target
    pub messages: BTreeMap<String, Properties>,
    /// mapper ids to execute locally
    pub mappers: BTreeSet<String>,
}

impl Activation {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.mappers.is_empty()
    }
}

/// Outcome of running activated mappers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MapperRun {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Own properties written by mapper outputs
    pub written: Vec<WatchKey>,
}

impl ActorState {
    /// Compute the fan-out of `actives`
    pub fn activate(&self, actives: &[WatchKey]) -> Activation {
        let mut activation = Activation::default();

        for active in actives {
            let exact = self.tentacles(active);
            if !exact.is_empty() {
                for tentacle in exact {
                    self.stage(&mut activation, tentacle, active, &active.property_key);
                }
                continue;
            }

            let wildcard = self.tentacles(&WatchKey::wildcard(active.entity_id.as_str()));
            if wildcard.is_empty() {
                continue;
            }
            debug!(entity_id = %active.entity_id, property_key = %active.property_key, "match wildcard tentacles");
            for tentacle in wildcard {
                self.stage(&mut activation, tentacle, active, active.root_property());
            }
        }

        activation
    }

    fn stage(&self, activation: &mut Activation, tentacle: &Tentacle, active: &WatchKey, path: &str) {
        match tentacle.kind {
            TentacleKind::Mapper => {
                activation.mappers.insert(tentacle.target_id.clone());
            }
            TentacleKind::Entity => {
                if tentacle.target_id == self.entity.id {
                    warn!(entity_id = %self.entity.id, tentacle_id = %tentacle.id, "skip tentacle targeting itself");
                    return;
                }
                let value = match self.property(&active.entity_id, path) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(entity_id = %self.entity.id, property_key = %path, error = %err, "skip removed property");
                        return;
                    }
                };
                activation
                    .messages
                    .entry(tentacle.target_id.clone())
                    .or_default()
                    .insert(path.to_string(), value);
            }
        }
    }

    /// Gather the inputs of `mapper_id` from own and cached properties
    pub fn mapper_input(&self, mapper_id: &str) -> BTreeMap<String, Node> {
        let mut input = BTreeMap::new();
        let Some(tentacle) = self.mappers.get(mapper_id).and_then(|m| m.mapper_tentacle()) else {
            return input;
        };

        for item in &tentacle.items {
            if item.is_wildcard() {
                if let Some(doc) = self.document(&item.entity_id) {
                    input.insert(item.to_string(), Node::Object(doc.clone()));
                }
                continue;
            }
            match self.property(&item.entity_id, &item.property_key) {
                Ok(value) => {
                    input.insert(item.to_string(), value);
                }
                Err(err) => {
                    debug!(mapper_id = %mapper_id, item = %item, error = %err, "mapper input missing");
                }
            }
        }
        input
    }

    /// Execute activated mappers and write their outputs with `replace`
    pub fn run_mappers(&mut self, mapper_ids: &BTreeSet<String>) -> MapperRun {
        let mut run = MapperRun::default();

        for mapper_id in mapper_ids {
            let Some(mapper) = self.mappers.get(mapper_id).cloned() else {
                warn!(entity_id = %self.entity.id, mapper_id = %mapper_id, "activated mapper not loaded");
                run.skipped += 1;
                continue;
            };

            let input = self.mapper_input(mapper_id);
            if input.is_empty() {
                debug!(mapper_id = %mapper_id, "obtain mapper input, empty params");
                run.skipped += 1;
                continue;
            }

            let output = match panic::catch_unwind(AssertUnwindSafe(|| mapper.exec(&input))) {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    error!(entity_id = %self.entity.id, mapper_id = %mapper_id, error = %err, "exec mapper");
                    run.failed += 1;
                    continue;
                }
                Err(_) => {
                    error!(entity_id = %self.entity.id, mapper_id = %mapper_id, "exec mapper panicked");
                    run.failed += 1;
                    continue;
                }
            };
            run.executed += 1;
            debug!(mapper_id = %mapper_id, input = ?input, output = ?output, "exec mapper");

            for (path, value) in output {
                match self.set_property(&path, value) {
                    Ok(()) => run.written.push(WatchKey::new(self.entity.id.as_str(), path)),
                    Err(err) => {
                        error!(entity_id = %self.entity.id, property_key = %path, error = %err, "set property");
                    }
                }
            }
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::message::PropertyMessage;
    use crate::environment::Environment;
    use serde_json::json;
    use std::sync::Arc;
    use twin_tql::TqlEngine;
    use twin_types::{Entity, MapperDef};

    fn env_with(defs: &[MapperDef]) -> Environment {
        let env = Environment::new(Arc::new(TqlEngine));
        env.store_mappers(defs);
        env
    }

    fn props(value: serde_json::Value) -> Properties {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_no_tentacles_is_noop() {
        let mut state = ActorState::new(Entity::new("lonely"));
        let keys = state.invoke_property_message(&PropertyMessage::new(props(json!({"temp": 1}))));
        let activation = state.activate(&keys);
        assert!(activation.is_empty());
        assert_eq!(state.run_mappers(&activation.mappers), MapperRun::default());
    }

    #[test]
    fn test_source_stages_one_message_per_target() {
        let env = env_with(&[
            MapperDef::new("m1", "device123", "insert into device123 select device234.temp as temp"),
            MapperDef::new("m2", "device123", "insert into device123 select device234.hum as hum"),
            MapperDef::new("m3", "device999", "insert into device999 select device234.temp as t"),
        ]);
        let mut state = ActorState::new(Entity::new("device234"));
        state.load_env(env.get_actor_env("device234"));

        let keys = state.invoke_property_message(&PropertyMessage::new(props(json!({"temp": 50, "hum": 3}))));
        let activation = state.activate(&keys);

        assert!(activation.mappers.is_empty());
        assert_eq!(activation.messages.len(), 2);
        assert_eq!(Node::Object(activation.messages["device123"].clone()), json!({"temp": 50, "hum": 3}));
        assert_eq!(Node::Object(activation.messages["device999"].clone()), json!({"temp": 50}));
    }

    #[test]
    fn test_target_runs_mapper_on_cached_input() {
        let env = env_with(&[MapperDef::new(
            "m1",
            "device123",
            "insert into device123 select device234.temp * 2 as double",
        )]);
        let mut state = ActorState::new(Entity::new("device123"));
        state.load_env(env.get_actor_env("device123"));

        let msg = PropertyMessage::new(props(json!({"temp": 50}))).with_state_id("device234");
        let keys = state.invoke_property_message(&msg);
        let activation = state.activate(&keys);
        assert!(activation.messages.is_empty());
        assert_eq!(activation.mappers.len(), 1);

        assert_eq!(
            state.mapper_input("device123-m1"),
            BTreeMap::from([("device234.temp".to_string(), json!(50))])
        );
        let run = state.run_mappers(&activation.mappers);
        assert_eq!(run.executed, 1);
        assert_eq!(run.written, vec![WatchKey::new("device123", "double")]);
        assert_eq!(state.entity().properties["double"], json!(100));
        assert_eq!(state.entity().version, 1);
    }

    #[test]
    fn test_wildcard_sends_root_property() {
        let env = env_with(&[MapperDef::new("m1", "mirror", "insert into mirror select device234.*")]);
        let mut state = ActorState::new(Entity::new("device234"));
        state.load_env(env.get_actor_env("device234"));

        let msg = PropertyMessage::new(props(json!({"metrics": {"temp": 1}})));
        state.invoke_property_message(&msg);
        let msg = PropertyMessage::new(props(json!({"metrics.temp": 7})));
        let keys = state.invoke_property_message(&msg);
        assert_eq!(keys, vec![WatchKey::new("device234", "metrics.temp")]);

        let activation = state.activate(&keys);
        assert_eq!(
            Node::Object(activation.messages["mirror"].clone()),
            json!({"metrics": {"temp": 7}})
        );
    }

    #[test]
    fn test_exec_failure_skips_only_that_mapper() {
        let env = env_with(&[
            MapperDef::new("bad", "t", "insert into t select s.x / 0 as y"),
            MapperDef::new("good", "t", "insert into t select s.x + 1 as z"),
        ]);
        let mut state = ActorState::new(Entity::new("t"));
        state.load_env(env.get_actor_env("t"));

        let msg = PropertyMessage::new(props(json!({"x": 1}))).with_state_id("s");
        let keys = state.invoke_property_message(&msg);
        let run = state.run_mappers(&state.activate(&keys).mappers);
        assert_eq!(run.executed, 1);
        assert_eq!(run.failed, 1);
        assert_eq!(state.entity().properties["z"], json!(2));
        assert!(!state.entity().properties.contains_key("y"));
    }

    #[test]
    fn test_self_targeting_tentacle_is_skipped() {
        let env = env_with(&[MapperDef::new("m1", "loop", "insert into loop select loop.a as b")]);
        let mut state = ActorState::new(Entity::new("loop"));
        state.load_env(env.get_actor_env("loop"));

        let keys = state.invoke_property_message(&PropertyMessage::new(props(json!({"a": 3}))));
        let activation = state.activate(&keys);
        assert!(activation.messages.is_empty());
        let run = state.run_mappers(&activation.mappers);
        assert_eq!(run.executed, 1);
        assert_eq!(state.entity().properties["b"], json!(3));
        // one hop: the mapper output is not activated again
        assert_eq!(run.written, vec![WatchKey::new("loop", "b")]);
    }

    #[test]
    fn test_integer_overflow_fails_only_that_mapper() {
        let env = env_with(&[
            MapperDef::new("div", "t", "insert into t select s.x / s.y as q"),
            MapperDef::new("neg", "t", "insert into t select -s.x as n"),
            MapperDef::new("copy", "t", "insert into t select s.y as y"),
        ]);
        let mut state = ActorState::new(Entity::new("t"));
        state.load_env(env.get_actor_env("t"));

        let msg = PropertyMessage::new(props(json!({"x": i64::MIN, "y": -1}))).with_state_id("s");
        let keys = state.invoke_property_message(&msg);
        let run = state.run_mappers(&state.activate(&keys).mappers);
        assert_eq!(run.executed, 1);
        assert_eq!(run.failed, 2);
        assert_eq!(state.entity().properties["y"], json!(-1));
    }

    #[test]
    fn test_removed_property_is_not_forwarded() {
        let env = env_with(&[
            MapperDef::new("m1", "device123", "insert into device123 select device234.temp as temp"),
            MapperDef::new("m2", "device123", "insert into device123 select device234.hum as hum"),
        ]);
        let mut state = ActorState::new(Entity::new("device234"));
        state.load_env(env.get_actor_env("device234"));
        state.invoke_property_message(&PropertyMessage::new(props(json!({"temp": 1, "hum": 2}))));

        let msg = PropertyMessage::new(props(json!({"temp": null}))).with_operator(twin_types::PatchOperator::Remove);
        let keys = state.invoke_property_message(&msg);
        assert_eq!(keys, vec![WatchKey::new("device234", "temp")]);
        assert!(state.activate(&keys).messages.is_empty());

        let keys = state.invoke_property_message(&PropertyMessage::new(props(json!({"hum": 3}))));
        assert_eq!(
            Node::Object(state.activate(&keys).messages["device123"].clone()),
            json!({"hum": 3})
        );
    }
}
