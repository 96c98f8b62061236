//! Mapper reconfiguration against live actors

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use twin_runtime::prelude::*;
use twin_runtime::{CollectingRouter, TentacleKind};
use twin_tql::TqlEngine;
use twin_types::WatchEvent;

const WAIT: Duration = Duration::from_secs(5);

fn property(target: &str, value: Value) -> MessageContext {
    let Value::Object(properties) = value else {
        panic!("properties must be an object");
    };
    MessageContext::property(target, PropertyMessage::new(properties))
}

fn rule(source: &str) -> MapperDef {
    MapperDef::new("m1", "A", format!("insert into A select {source}.temp as temp"))
}

#[tokio::test]
async fn test_reregistered_mapper_leaves_no_stale_subscription() {
    let repository = Arc::new(MemoryRepository::new());
    let router = Arc::new(CollectingRouter::new());
    let env = Arc::new(Environment::new(Arc::new(TqlEngine)));
    let manager = ManagerBuilder::new(Config::default(), env.clone(), repository.clone(), router.clone()).build();

    repository.put_mapper(&rule("B")).await.unwrap();
    manager.start().await.unwrap();

    // B is live before the rule changes
    manager.handle_message(property("B", json!({"temp": 1}))).await.unwrap();
    assert!(manager.wait_idle(WAIT).await);
    assert_eq!(router.take().len(), 1);

    let effects = manager.on_mapper_changed(&WatchEvent::Put(rule("C"))).unwrap();
    assert_eq!(effects, vec!["A", "B", "C"]);

    manager.handle_message(property("B", json!({"temp": 2}))).await.unwrap();
    manager.handle_message(property("C", json!({"temp": 3}))).await.unwrap();
    assert!(manager.wait_idle(WAIT).await);

    let routed = router.take();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].target(), Some("A"));
    assert_eq!(routed[0].headers.sender(), Some("C"));

    let b = manager.actor("B").unwrap();
    assert!(b.with_state(|s| s.tentacles(&WatchKey::new("B", "temp")).is_empty()));
    assert!(manager.shutdown(WAIT).await);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_last_registration_wins(sources in prop::collection::vec("[B-F]", 1..12)) {
        let env = Environment::new(Arc::new(TqlEngine));
        for source in &sources {
            env.on_mapper_changed(&WatchEvent::Put(rule(source))).unwrap();
        }
        let last = sources.last().unwrap();

        for candidate in ["B", "C", "D", "E", "F"] {
            let tentacles = env.get_actor_env(candidate).tentacles;
            if candidate == last {
                prop_assert_eq!(tentacles.len(), 1);
                prop_assert_eq!(tentacles[0].kind, TentacleKind::Entity);
            } else {
                prop_assert!(tentacles.is_empty());
            }
        }
        prop_assert_eq!(env.mapper_entities("A-m1").unwrap(), vec!["A".to_string(), last.clone()]);
        prop_assert_eq!(env.cache_count(), 2);
    }
}
