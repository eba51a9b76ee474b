//! Keyed list collections: tags, habits and the three goal tiers.
//!
//! Lists merge as a union keyed by item identity. Output keeps the remote
//! order with conflicting items replaced in place; items only the local side
//! knows are appended in local order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use super::MergeStrategy;

/// How an item in a list is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// The `id` field (string or number, never equal to each other).
    Id,
    /// The `name` field, trimmed and compared case-insensitively.
    Name,
}

impl IdentityRule {
    fn identity(self, item: &Value) -> Option<String> {
        match self {
            Self::Id => item_id(item),
            Self::Name => item
                .get("name")
                .and_then(Value::as_str)
                .map(|name| name.trim().to_lowercase()),
        }
    }
}

/// Merge strategy for a list of identified items.
#[derive(Debug, Clone)]
pub struct KeyedList {
    name: &'static str,
    identity: IdentityRule,
    union_completed_dates: bool,
}

impl KeyedList {
    /// Goals match by id; the side with more progress wins.
    #[must_use]
    pub fn goals() -> Self {
        Self {
            name: "goals",
            identity: IdentityRule::Id,
            union_completed_dates: false,
        }
    }

    /// Tags match by name regardless of case.
    #[must_use]
    pub fn tags() -> Self {
        Self {
            name: "tags",
            identity: IdentityRule::Name,
            union_completed_dates: false,
        }
    }

    /// Habits match by id and keep every completion date either side saw.
    #[must_use]
    pub fn habits() -> Self {
        Self {
            name: "habits",
            identity: IdentityRule::Id,
            union_completed_dates: true,
        }
    }

    fn pick(&self, local: &Value, remote: &Value) -> Value {
        let winner = match progress(local)
            .partial_cmp(&progress(remote))
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_created_at(local, remote))
        {
            Ordering::Less => remote,
            Ordering::Equal | Ordering::Greater => local,
        };
        let mut winner = winner.clone();
        if self.union_completed_dates {
            union_completed_dates(&mut winner, local, remote);
        }
        winner
    }
}

impl MergeStrategy for KeyedList {
    fn name(&self) -> &'static str {
        self.name
    }

    fn merge(&self, local: &Value, remote: &Value) -> Value {
        match (local.as_array(), remote.as_array()) {
            (Some(local), Some(remote)) => Value::Array(union_by_identity(
                local,
                remote,
                |item| self.identity.identity(item),
                |l, r| self.pick(l, r),
            )),
            _ => remote.clone(),
        }
    }

    fn empty(&self) -> Value {
        Value::Array(Vec::new())
    }
}

/// Union two lists by identity.
///
/// Items present on both sides go through `pick(local, remote)`. Items
/// without an identity are kept and deduplicated by equality. Repeated
/// identities within one side keep their first occurrence.
pub(crate) fn union_by_identity<I, P>(
    local: &[Value],
    remote: &[Value],
    identity: I,
    pick: P,
) -> Vec<Value>
where
    I: Fn(&Value) -> Option<String>,
    P: Fn(&Value, &Value) -> Value,
{
    let mut local_by_id: HashMap<String, &Value> = HashMap::new();
    for item in local {
        if let Some(id) = identity(item) {
            local_by_id.entry(id).or_insert(item);
        }
    }

    let mut out = Vec::with_capacity(local.len().max(remote.len()));
    let mut seen: HashSet<String> = HashSet::new();

    for item in remote {
        match identity(item) {
            Some(id) => {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match local_by_id.get(&id) {
                    Some(&local_item) => out.push(pick(local_item, item)),
                    None => out.push(item.clone()),
                }
            }
            None => {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
        }
    }

    for item in local {
        match identity(item) {
            Some(id) => {
                if seen.insert(id) {
                    out.push(item.clone());
                }
            }
            None => {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
        }
    }

    out
}

/// `id` in its JSON form, so the number `1` and the string `"1"` are
/// different items.
pub(crate) fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        id @ (Value::String(_) | Value::Number(_)) => Some(id.to_string()),
        _ => None,
    }
}

fn progress(item: &Value) -> f64 {
    item.get("progress").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Order two items by `createdAt`, newer is greater.
///
/// Numbers compare numerically, strings lexicographically (ISO-8601 sorts
/// correctly). An item with a timestamp is newer than one without.
pub(crate) fn compare_created_at(a: &Value, b: &Value) -> Ordering {
    match (a.get("createdAt"), b.get("createdAt")) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), None) if !x.is_null() => Ordering::Greater,
        (None, Some(y)) if !y.is_null() => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn union_completed_dates(winner: &mut Value, local: &Value, remote: &Value) {
    let dates = |v: &Value| -> Vec<Value> {
        v.get("completedDates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let (local_dates, remote_dates) = (dates(local), dates(remote));
    if local_dates.is_empty() && remote_dates.is_empty() {
        return;
    }

    let mut strings = BTreeSet::new();
    let mut others: Vec<Value> = Vec::new();
    for date in local_dates.into_iter().chain(remote_dates) {
        match date {
            Value::String(s) => {
                strings.insert(s);
            }
            other => {
                if !others.contains(&other) {
                    others.push(other);
                }
            }
        }
    }

    let merged: Vec<Value> = strings.into_iter().map(Value::String).chain(others).collect();
    if let Some(obj) = winner.as_object_mut() {
        obj.insert("completedDates".to_string(), Value::Array(merged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_goal_with_more_progress_wins() {
        let local = json!([{"id": "g1", "title": "run", "progress": 40}]);
        let remote = json!([{"id": "g1", "title": "run 5k", "progress": 60}]);

        let merged = KeyedList::goals().merge(&local, &remote);
        assert_eq!(merged, json!([{"id": "g1", "title": "run 5k", "progress": 60}]));

        let merged = KeyedList::goals().merge(&remote, &local);
        assert_eq!(merged, json!([{"id": "g1", "title": "run 5k", "progress": 60}]));
    }

    #[test]
    fn test_goal_progress_tie_prefers_newer_creation() {
        let local = json!([{"id": 7, "progress": 50, "createdAt": "2024-03-01T00:00:00Z"}]);
        let remote = json!([{"id": 7, "progress": 50, "createdAt": "2024-02-01T00:00:00Z"}]);

        let merged = KeyedList::goals().merge(&local, &remote);
        assert_eq!(merged[0]["createdAt"], json!("2024-03-01T00:00:00Z"));

        let merged = KeyedList::goals().merge(&remote, &local);
        assert_eq!(merged[0]["createdAt"], json!("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn test_full_tie_keeps_local() {
        let local = json!([{"id": "g", "progress": 0, "title": "local"}]);
        let remote = json!([{"id": "g", "progress": 0, "title": "remote"}]);

        let merged = KeyedList::goals().merge(&local, &remote);
        assert_eq!(merged[0]["title"], json!("local"));
    }

    #[test]
    fn test_goal_union_keeps_both_sides() {
        let local = json!([{"id": "a"}, {"id": "c"}]);
        let remote = json!([{"id": "b"}, {"id": "a"}]);

        let merged = KeyedList::goals().merge(&local, &remote);
        let ids: Vec<&str> = merged
            .as_array()
            .unwrap()
            .iter()
            .map(|g| g["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_tags_match_case_insensitively() {
        let local = json!([{"name": "Work ", "color": "red"}, {"name": "gym"}]);
        let remote = json!([{"name": "work", "color": "blue"}]);

        let merged = KeyedList::tags().merge(&local, &remote);
        let merged = merged.as_array().unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1]["name"], json!("gym"));
    }

    #[test]
    fn test_habit_completion_dates_are_unioned() {
        let local = json!([{"id": "h1", "name": "read", "completedDates": ["2024-01-01"]}]);
        let remote = json!([{"id": "h1", "name": "read", "completedDates": ["2024-01-02"]}]);

        let merged = KeyedList::habits().merge(&local, &remote);
        assert_eq!(
            merged[0]["completedDates"],
            json!(["2024-01-01", "2024-01-02"])
        );
    }

    #[test]
    fn test_habit_dates_union_when_one_side_has_none() {
        let local = json!([{"id": "h1"}]);
        let remote = json!([{"id": "h1", "completedDates": ["2024-05-05", "2024-05-04"]}]);

        let merged = KeyedList::habits().merge(&local, &remote);
        assert_eq!(merged[0]["completedDates"], json!(["2024-05-04", "2024-05-05"]));
    }

    #[test]
    fn test_items_without_identity_are_deduplicated() {
        let local = json!([{"note": "x"}, {"id": "a"}]);
        let remote = json!([{"note": "x"}, {"note": "y"}]);

        let merged = KeyedList::goals().merge(&local, &remote);
        assert_eq!(merged, json!([{"note": "x"}, {"note": "y"}, {"id": "a"}]));
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let local = json!([{"id": "a", "progress": 1}, {"id": "a", "progress": 9}]);
        let remote = json!([]);

        let merged = KeyedList::goals().merge(&local, &remote);
        assert_eq!(merged, json!([{"id": "a", "progress": 1}]));
    }

    #[test]
    fn test_malformed_side_yields_remote() {
        let merged = KeyedList::tags().merge(&json!({"oops": 1}), &json!([{"name": "a"}]));
        assert_eq!(merged, json!([{"name": "a"}]));
    }

    #[test]
    fn test_created_at_ordering() {
        assert_eq!(
            compare_created_at(&json!({"createdAt": 5}), &json!({"createdAt": 3})),
            Ordering::Greater
        );
        assert_eq!(
            compare_created_at(&json!({}), &json!({"createdAt": "2024"})),
            Ordering::Less
        );
        assert_eq!(compare_created_at(&json!({}), &json!({})), Ordering::Equal);
    }

    #[test]
    fn test_numeric_and_string_ids() {
        assert_eq!(item_id(&json!({"id": 12})), Some("12".to_string()));
        assert_eq!(item_id(&json!({"id": "x"})), Some("\"x\"".to_string()));
        assert_ne!(item_id(&json!({"id": 1})), item_id(&json!({"id": "1"})));
        assert_eq!(item_id(&json!({"id": null})), None);
    }

    #[test]
    fn test_numeric_id_does_not_match_string_id() {
        let merged = KeyedList::goals().merge(
            &json!([{"id": 1, "progress": 10}]),
            &json!([{"id": "1", "progress": 50}]),
        );
        assert_eq!(
            merged,
            json!([{"id": "1", "progress": 50}, {"id": 1, "progress": 10}])
        );
    }
}
