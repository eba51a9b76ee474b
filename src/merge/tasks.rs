//! Date-partitioned task collections.
//!
//! The value is an object of `date -> [task]`. Partitions are unioned; tasks
//! within a shared date are unioned by `id`. When both sides hold the same
//! task, the more complete copy wins:
//!
//! | signal                  | score |
//! |-------------------------|-------|
//! | `completed == true`     | +10   |
//! | `timeSpent > 0`         | +5    |
//! | `focusTime > 0`         | +5    |
//! | non-empty `subtasks`    | +3    |
//!
//! Equal scores fall back to the newer `createdAt`, then to the local copy.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::collections::{compare_created_at, item_id, union_by_identity};
use super::MergeStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct DailyTasks;

impl MergeStrategy for DailyTasks {
    fn name(&self) -> &'static str {
        "daily_tasks"
    }

    fn merge(&self, local: &Value, remote: &Value) -> Value {
        let (Some(local), Some(remote)) = (local.as_object(), remote.as_object()) else {
            return remote.clone();
        };

        let mut out = Map::new();
        for (date, remote_tasks) in remote {
            let merged = match local.get(date) {
                Some(local_tasks) => merge_day(local_tasks, remote_tasks),
                None => remote_tasks.clone(),
            };
            out.insert(date.clone(), merged);
        }
        for (date, local_tasks) in local {
            if !out.contains_key(date) {
                out.insert(date.clone(), local_tasks.clone());
            }
        }
        Value::Object(out)
    }

    fn empty(&self) -> Value {
        Value::Object(Map::new())
    }
}

fn merge_day(local: &Value, remote: &Value) -> Value {
    match (local.as_array(), remote.as_array()) {
        (Some(local), Some(remote)) => {
            Value::Array(union_by_identity(local, remote, item_id, pick_task))
        }
        _ => remote.clone(),
    }
}

fn pick_task(local: &Value, remote: &Value) -> Value {
    let winner = completeness(local)
        .cmp(&completeness(remote))
        .then_with(|| compare_created_at(local, remote));
    match winner {
        Ordering::Less => remote.clone(),
        Ordering::Equal | Ordering::Greater => local.clone(),
    }
}

/// How much work a task copy records.
#[must_use]
pub fn completeness(task: &Value) -> u32 {
    let positive = |field: &str| task.get(field).and_then(Value::as_f64).is_some_and(|v| v > 0.0);

    let mut score = 0;
    if task.get("completed").and_then(Value::as_bool) == Some(true) {
        score += 10;
    }
    if positive("timeSpent") {
        score += 5;
    }
    if positive("focusTime") {
        score += 5;
    }
    if task
        .get("subtasks")
        .and_then(Value::as_array)
        .is_some_and(|subtasks| !subtasks.is_empty())
    {
        score += 3;
    }
    score
}
