//! Canonical value encoding shared by every storage backend.
//!
//! Nested maps are flattened to dot-paths for storage and rebuilt on read.
//! Two merge policies combine buffered writes:
//! - [`merge_overwrite`]: the later value wins (`set`).
//! - [`merge_add`]: numeric leaves are summed (`increment`).

pub mod value;

pub use value::{value_map, FlatValue, Value, ValueMap};

use crate::core::{BucketryError, Result};

const PATH_SEPARATOR: char = '.';

/// Flatten a nested map into dot-path keyed scalars. Time values become
/// unix seconds; empty maps produce no entries.
pub fn flatten(map: &ValueMap) -> FlatValue {
    flatten_with_prefix(map, "")
}

/// Flatten with every path rooted at `prefix`.
pub fn flatten_with_prefix(map: &ValueMap, prefix: &str) -> FlatValue {
    let mut flat = FlatValue::new();
    flatten_into(map, prefix, &mut flat);
    flat
}

fn flatten_into(map: &ValueMap, prefix: &str, flat: &mut FlatValue) {
    for (key, value) in map {
        let path = join_path(prefix, key);
        match value {
            Value::Map(inner) => flatten_into(inner, &path, flat),
            Value::Time(at) => {
                flat.insert(path, Value::Int(at.timestamp()));
            },
            leaf => {
                flat.insert(path, leaf.clone());
            },
        }
    }
}

/// Rebuild nested maps from dot-paths. Fails if one path is both a leaf
/// and a parent of another path.
pub fn unflatten(flat: &FlatValue) -> Result<ValueMap> {
    let mut root = ValueMap::new();
    for (path, value) in flat {
        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        insert_path(&mut root, path, &segments, value.clone())?;
    }
    Ok(root)
}

fn insert_path(node: &mut ValueMap, path: &str, segments: &[&str], value: Value) -> Result<()> {
    match segments {
        [] => Ok(()),
        [leaf] => {
            if node.contains_key(*leaf) {
                return Err(BucketryError::PathConflict {
                    path: path.to_string(),
                });
            }
            node.insert((*leaf).to_string(), value);
            Ok(())
        },
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Map(ValueMap::new()));
            match child {
                Value::Map(inner) => insert_path(inner, path, rest, value),
                _ => Err(BucketryError::PathConflict {
                    path: path.to_string(),
                }),
            }
        },
    }
}

/// Recursive merge where `update` wins except where both sides are maps.
pub fn merge_overwrite(base: &ValueMap, update: &ValueMap) -> ValueMap {
    let mut merged = base.clone();
    overwrite_into(&mut merged, update);
    merged
}

fn overwrite_into(target: &mut ValueMap, update: &ValueMap) {
    for (key, incoming) in update {
        if let (Some(Value::Map(existing)), Value::Map(nested)) = (target.get_mut(key), incoming) {
            overwrite_into(existing, nested);
            continue;
        }
        target.insert(key.clone(), incoming.clone());
    }
}

/// Recursive merge summing numeric leaves present on both sides.
///
/// A map meeting a scalar, or two leaves that are not both numeric, is a
/// caller error and is reported as [`BucketryError::MergeConflict`].
pub fn merge_add(base: &ValueMap, update: &ValueMap) -> Result<ValueMap> {
    let mut merged = base.clone();
    add_into(&mut merged, update, "")?;
    Ok(merged)
}

fn add_into(target: &mut ValueMap, update: &ValueMap, prefix: &str) -> Result<()> {
    for (key, incoming) in update {
        let path = join_path(prefix, key);
        match (target.get_mut(key), incoming) {
            (None, _) => {
                target.insert(key.clone(), incoming.clone());
            },
            (Some(Value::Map(existing)), Value::Map(nested)) => add_into(existing, nested, &path)?,
            (Some(existing), _) => {
                let sum = existing.checked_sum(incoming).ok_or_else(|| {
                    BucketryError::merge_conflict(
                        &path,
                        format!("cannot add {} to {}", incoming.kind(), existing.kind()),
                    )
                })?;
                *existing = sum;
            },
        }
    }
    Ok(())
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{PATH_SEPARATOR}{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn nested() -> ValueMap {
        value_map([
            ("count", Value::from(3)),
            (
                "latency",
                Value::Map(value_map([
                    ("p50", Value::from(12.5)),
                    ("buckets", Value::Map(value_map([("fast", 7), ("slow", 1)]))),
                ])),
            ),
            ("region", Value::from("eu-west")),
        ])
    }

    #[test]
    fn test_flatten_paths() {
        let flat = flatten(&nested());
        assert_eq!(
            flat,
            value_map([
                ("count", Value::from(3)),
                ("latency.buckets.fast", Value::from(7)),
                ("latency.buckets.slow", Value::from(1)),
                ("latency.p50", Value::from(12.5)),
                ("region", Value::from("eu-west")),
            ])
        );
    }

    #[test]
    fn test_flatten_with_prefix() {
        let flat = flatten_with_prefix(&value_map([("hits", 1)]), "values");
        assert_eq!(flat, value_map([("values.hits", 1)]));
    }

    #[test]
    fn test_flatten_converts_time_to_unix_seconds() {
        let at: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let flat = flatten(&value_map([("last_seen", Value::from(at))]));
        assert_eq!(flat["last_seen"], Value::Int(1_714_557_600));
    }

    #[test]
    fn test_unflatten_inverts_flatten() {
        let original = nested();
        assert_eq!(unflatten(&flatten(&original)).unwrap(), original);
    }

    #[test]
    fn test_unflatten_merges_shared_prefixes() {
        let flat = value_map([("a.b", 1), ("a.c", 2), ("d", 3)]);
        let rebuilt = unflatten(&flat).unwrap();
        assert_eq!(
            rebuilt,
            value_map([
                ("a", Value::Map(value_map([("b", 1), ("c", 2)]))),
                ("d", Value::from(3)),
            ])
        );
    }

    #[test]
    fn test_unflatten_rejects_leaf_and_parent() {
        let flat = value_map([("a", 1), ("a.b", 2)]);
        assert!(matches!(unflatten(&flat), Err(BucketryError::PathConflict { path }) if path == "a.b"));
    }

    #[test]
    fn test_merge_overwrite() {
        let base = value_map([
            ("gauge", Value::from(10)),
            ("nested", Value::Map(value_map([("keep", 1), ("replace", 2)]))),
        ]);
        let update = value_map([
            ("gauge", Value::from(4)),
            ("nested", Value::Map(value_map([("replace", 9)]))),
            ("new", Value::from("x")),
        ]);
        assert_eq!(
            merge_overwrite(&base, &update),
            value_map([
                ("gauge", Value::from(4)),
                ("nested", Value::Map(value_map([("keep", 1), ("replace", 9)]))),
                ("new", Value::from("x")),
            ])
        );
    }

    #[test]
    fn test_merge_overwrite_scalar_replaces_map() {
        let base = value_map([("a", Value::Map(value_map([("b", 1)])))]);
        let update = value_map([("a", 5)]);
        assert_eq!(merge_overwrite(&base, &update), value_map([("a", 5)]));
    }

    #[test]
    fn test_merge_add_sums_nested_leaves() {
        let mut numeric = nested();
        numeric.remove("region");
        let merged = merge_add(&numeric, &numeric).unwrap();
        assert_eq!(merged["count"], Value::Int(6));
        let latency = merged["latency"].as_map().unwrap();
        assert_eq!(latency["p50"], Value::Float(25.0));
        assert_eq!(latency["buckets"], Value::Map(value_map([("fast", 14), ("slow", 2)])));
    }

    #[test]
    fn test_merge_add_identity_and_commutativity() {
        let a = value_map([("x", Value::from(1)), ("y", Value::Map(value_map([("z", 2)])))]);
        let b = value_map([("x", Value::from(5)), ("w", Value::from(7))]);
        let c = value_map([("y", Value::Map(value_map([("z", 4), ("q", 1)])))]);

        assert_eq!(merge_add(&a, &ValueMap::new()).unwrap(), a);
        assert_eq!(merge_add(&ValueMap::new(), &a).unwrap(), a);
        assert_eq!(merge_add(&a, &b).unwrap(), merge_add(&b, &a).unwrap());
        assert_eq!(
            merge_add(&merge_add(&a, &b).unwrap(), &c).unwrap(),
            merge_add(&a, &merge_add(&b, &c).unwrap()).unwrap()
        );
    }

    #[test]
    fn test_merge_add_rejects_text_leaves() {
        let err = merge_add(&value_map([("label", "a")]), &value_map([("label", "b")])).unwrap_err();
        assert!(matches!(err, BucketryError::MergeConflict { ref path, .. } if path == "label"));
    }

    #[test]
    fn test_merge_add_rejects_map_against_scalar() {
        let base = value_map([("a", Value::Map(value_map([("b", 1)])))]);
        let err = merge_add(&base, &value_map([("a", 1)])).unwrap_err();
        assert!(matches!(err, BucketryError::MergeConflict { ref path, .. } if path == "a"));

        let err = merge_add(&value_map([("a", 1)]), &base).unwrap_err();
        assert!(matches!(err, BucketryError::MergeConflict { .. }));
    }
}
