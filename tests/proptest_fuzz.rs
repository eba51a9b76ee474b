//! Property-based tests for conflict resolution and the local API.
//!
//! Uses proptest to generate random and malformed inputs and verify the
//! merge engine stays deterministic, never panics, and honors its
//! adopt-versus-merge rules.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use backup_sync::{
    DataKey, InMemoryBackup, MemoryLocalStore, MergeEngine, Resolution, SyncConfig, SyncEngine,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn data_key_strategy() -> impl Strategy<Value = DataKey> {
    prop::sample::select(DataKey::ALL.to_vec())
}

fn task_strategy() -> impl Strategy<Value = Value> {
    (
        0u32..20,
        any::<bool>(),
        0u32..200,
        0u32..200,
        0usize..3,
        0i64..1_000,
    )
        .prop_map(|(id, completed, time_spent, focus, subtasks, created)| {
            json!({
                "id": format!("t{}", id),
                "completed": completed,
                "timeSpent": time_spent,
                "focusTime": focus,
                "subtasks": (0..subtasks).map(|i| json!({"id": i})).collect::<Vec<_>>(),
                "createdAt": created,
            })
        })
}

fn daily_tasks_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        "2024-0[1-3]-0[1-9]",
        prop::collection::vec(task_strategy(), 0..6),
        0..5,
    )
    .prop_map(|days| {
        Value::Object(
            days.into_iter()
                .map(|(day, tasks)| (day, Value::Array(tasks)))
                .collect::<Map<String, Value>>(),
        )
    })
}

fn goals_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec((0u32..10, 0u32..100, 0i64..100), 0..8).prop_map(|goals| {
        Value::Array(
            goals
                .into_iter()
                .map(|(id, progress, created)| {
                    json!({"id": format!("g{}", id), "progress": progress, "createdAt": created})
                })
                .collect(),
        )
    })
}

/// Arbitrary JSON values (including shapes no key expects)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn task_ids(value: &Value) -> BTreeSet<String> {
    value
        .as_object()
        .into_iter()
        .flat_map(|days| days.values())
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|t| t.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn goal_ids(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|g| g.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

// =============================================================================
// Merge properties
// =============================================================================

proptest! {
    #[test]
    fn resolve_is_idempotent(
        key in data_key_strategy(),
        local in arbitrary_json_strategy(),
        remote in arbitrary_json_strategy(),
        local_at in 0i64..100,
        remote_at in 0i64..100,
    ) {
        let engine = MergeEngine::with_defaults();
        let first = engine.resolve(key, Some((&local, local_at)), Some((&remote, remote_at)));
        let second = engine.resolve(key, Some((&local, local_at)), Some((&remote, remote_at)));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn same_age_or_newer_remote_is_adopted_verbatim(
        key in data_key_strategy(),
        local in arbitrary_json_strategy(),
        remote in arbitrary_json_strategy(),
        local_at in 0i64..100,
        lead in 0i64..100,
    ) {
        let engine = MergeEngine::with_defaults();
        let resolved = engine.resolve(key, Some((&local, local_at)), Some((&remote, local_at + lead)));
        prop_assert_eq!(resolved.value, remote);
        prop_assert_eq!(resolved.resolution, Resolution::AdoptRemote);
    }

    #[test]
    fn deleted_tasks_do_not_come_back(
        local in daily_tasks_strategy(),
        remote in daily_tasks_strategy(),
        local_at in 0i64..100,
        lead in 0i64..100,
    ) {
        let engine = MergeEngine::with_defaults();
        let resolved = engine.resolve(
            DataKey::DailyTasks,
            Some((&local, local_at)),
            Some((&remote, local_at + lead)),
        );

        let merged_ids = task_ids(&resolved.value);
        let remote_ids = task_ids(&remote);
        for id in task_ids(&local).difference(&remote_ids) {
            prop_assert!(!merged_ids.contains(id), "task {} resurrected", id);
        }
    }

    #[test]
    fn newer_local_tasks_keep_every_id(
        local in daily_tasks_strategy(),
        remote in daily_tasks_strategy(),
        remote_at in 0i64..100,
        lead in 1i64..100,
    ) {
        let engine = MergeEngine::with_defaults();
        let resolved = engine.resolve(
            DataKey::DailyTasks,
            Some((&local, remote_at + lead)),
            Some((&remote, remote_at)),
        );

        let merged_ids = task_ids(&resolved.value);
        let expected: BTreeSet<String> = task_ids(&local).union(&task_ids(&remote)).cloned().collect();
        prop_assert_eq!(merged_ids, expected);
    }

    #[test]
    fn newer_local_goals_are_a_union_without_duplicates(
        local in goals_strategy(),
        remote in goals_strategy(),
    ) {
        let engine = MergeEngine::with_defaults();
        let resolved = engine.resolve(DataKey::WeeklyGoals, Some((&local, 2)), Some((&remote, 1)));

        let merged = resolved.value.as_array().cloned().unwrap_or_default();
        let ids = goal_ids(&resolved.value);
        let expected: BTreeSet<String> = goal_ids(&local).union(&goal_ids(&remote)).cloned().collect();
        prop_assert_eq!(ids.len(), merged.len());
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn merge_never_panics_on_malformed_values(
        key in data_key_strategy(),
        local in arbitrary_json_strategy(),
        remote in arbitrary_json_strategy(),
    ) {
        let engine = MergeEngine::with_defaults();
        let _ = engine.strategy(key).merge(&local, &remote);
    }

    #[test]
    fn scalar_remote_wins_whatever_the_timestamps(
        local in ".*",
        remote in ".*",
        local_at in 0i64..100,
        remote_at in 0i64..100,
    ) {
        let engine = MergeEngine::with_defaults();
        let (local, remote) = (Value::String(local), Value::String(remote));
        let resolved = engine.resolve(DataKey::Theme, Some((&local, local_at)), Some((&remote, remote_at)));
        prop_assert_eq!(resolved.value, remote);
    }
}

// =============================================================================
// Local API
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn set_get_round_trips_any_non_null_value(
        key in data_key_strategy(),
        value in arbitrary_json_strategy(),
    ) {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(MemoryLocalStore::new()),
            Arc::new(InMemoryBackup::new()),
        );

        let result = engine.set(key, value.clone());
        if value.is_null() {
            prop_assert!(result.is_err());
            prop_assert!(engine.get(key).is_none());
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(engine.get(key), Some(value));
        }
    }

    #[test]
    fn import_never_panics(doc in arbitrary_json_strategy()) {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(MemoryLocalStore::new()),
            Arc::new(InMemoryBackup::new()),
        );
        let _ = engine.import_snapshot(doc);
    }
}
