use proptest::prelude::*;
use std::collections::BTreeSet;
use twin_runtime::placement::{hash32, Placement};
use twin_types::QueueInfo;

fn ring(ids: &BTreeSet<String>) -> Placement {
    let placement = Placement::new();
    for id in ids {
        placement.append(QueueInfo::new(id.as_str()));
    }
    placement
}

proptest! {
    #[test]
    fn prop_select_is_stable(
        ids in prop::collection::btree_set("core-[a-z0-9]{1,6}", 1..8),
        key in "[a-zA-Z0-9_-]{1,32}",
    ) {
        let placement = ring(&ids);
        let first = placement.select(&key).unwrap().id;
        for _ in 0..4 {
            prop_assert_eq!(&placement.select(&key).unwrap().id, &first);
        }

        let sorted: Vec<&String> = ids.iter().collect();
        prop_assert_eq!(&first, sorted[hash32(&key) as usize % sorted.len()]);
    }

    #[test]
    fn prop_removed_queue_is_never_selected(
        ids in prop::collection::btree_set("core-[a-z0-9]{1,6}", 2..8),
        keys in prop::collection::vec("[a-zA-Z0-9_-]{1,32}", 1..32),
    ) {
        let placement = ring(&ids);
        let owner = placement.select(&keys[0]).unwrap().id;
        placement.remove(&owner);

        for key in &keys {
            let selected = placement.select(key).unwrap();
            prop_assert_ne!(&selected.id, &owner);
        }
    }

    #[test]
    fn prop_insertion_order_does_not_matter(
        ids in prop::collection::btree_set("core-[a-z0-9]{1,6}", 1..8),
        key in "[a-zA-Z0-9_-]{1,32}",
    ) {
        let forward = ring(&ids);
        let reverse = Placement::new();
        for id in ids.iter().rev() {
            reverse.append(QueueInfo::new(id.as_str()));
        }
        prop_assert_eq!(forward.queue_ids(), reverse.queue_ids());
        prop_assert_eq!(forward.select(&key).unwrap().id, reverse.select(&key).unwrap().id);
    }
}
