use ferrous_locator::naming::instance_name;
use ferrous_locator::{Container, DiError, FactoryContext, Registry, Scope, ServiceArgs, Target, Token};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::sync::Arc;

fn index_target(index: usize) -> Target {
    Target::factory(move |_: FactoryContext, _: ServiceArgs| async move { Ok::<_, DiError>(index) })
}

/// Index of the record that should win: highest priority, latest among equals.
fn expected_winner(priorities: &[i32]) -> Option<usize> {
    priorities
        .iter()
        .enumerate()
        .max_by_key(|(i, p)| (**p, *i))
        .map(|(i, _)| i)
}

proptest! {
    #[test]
    fn instance_name_ignores_key_order(entries in prop::collection::btree_map("[a-z]{1,6}", 0i64..1000, 1..8)) {
        let forward: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        let reversed: Map<String, Value> = entries
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();

        let a = instance_name("Svc(1)", Some(&Value::Object(forward)));
        let b = instance_name("Svc(1)", Some(&Value::Object(reversed)));
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with("Svc(1):"));
    }

    #[test]
    fn distinct_arguments_give_distinct_names(x in 0u32..10_000, y in 0u32..10_000) {
        prop_assume!(x != y);
        let a = instance_name("Svc(1)", Some(&serde_json::json!({ "n": x })));
        let b = instance_name("Svc(1)", Some(&serde_json::json!({ "n": y })));
        prop_assert_ne!(a, b);
    }
}

proptest! {
    #[test]
    fn highest_priority_latest_registration_wins(priorities in prop::collection::vec(-5i32..5, 1..12)) {
        let token = Token::<usize>::new("Ranked");
        let registry = Arc::new(Registry::new());
        for (index, priority) in priorities.iter().enumerate() {
            registry.set(&token, Scope::Transient, index_target(index), *priority);
        }

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let container = Container::with_registry(registry.clone());
        let winner = runtime.block_on(container.get(&token)).unwrap();
        prop_assert_eq!(Some(*winner), expected_winner(&priorities));

        // Deleting the winner promotes the best of the rest
        let mut remaining: Vec<(usize, i32)> = priorities.iter().copied().enumerate().collect();
        remaining.remove(*winner);
        registry.delete(&token);
        let next = runtime.block_on(container.get(&token));
        match remaining.iter().max_by_key(|(i, p)| (*p, *i)) {
            Some((index, _)) => prop_assert_eq!(*next.unwrap(), *index),
            None => prop_assert!(matches!(next, Err(DiError::FactoryNotFound(_)))),
        }
    }

    #[test]
    fn get_all_is_sorted_by_rank(priorities in prop::collection::vec(-3i32..3, 0..10)) {
        let token = Token::<usize>::new("Sorted");
        let registry = Registry::new();
        for (index, priority) in priorities.iter().enumerate() {
            registry.set(&token, Scope::Singleton, index_target(index), *priority);
        }

        let ranked: Vec<i32> = registry.get_all(&token).iter().map(|r| r.priority).collect();
        let mut expected = priorities.clone();
        expected.sort_by(|a, b| b.cmp(a));
        prop_assert_eq!(ranked, expected);
        prop_assert_eq!(registry.has(&token), !priorities.is_empty());
    }
}

#[test]
fn expected_winner_prefers_latest_tie() {
    assert_eq!(expected_winner(&[1, 3, 3, 2]), Some(2));
    assert_eq!(expected_winner(&[]), None);
}
