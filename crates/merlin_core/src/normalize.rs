//! Null-stripping and key-case normalization over JSON trees.
//!
//! Manifests are written through [`normalize`] so that the stored shape does not depend on
//! which optional fields a config happened to set, and so that keys follow a single casing.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCase {
    /// `bootDiskSizeGb` -> `boot_disk_size_gb`
    #[default]
    Snake,
    /// `boot_disk_size_gb` -> `bootDiskSizeGb`
    Camel,
}

impl KeyCase {
    pub fn apply(self, key: &str) -> String {
        match self {
            KeyCase::Snake => to_snake_case(key),
            KeyCase::Camel => to_camel_case(key),
        }
    }
}

/// Recursively removes `null` object fields and rewrites every object key to `case`.
///
/// Array elements are normalized but never removed. The transform is idempotent.
pub fn normalize(value: Value, case: KeyCase) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (case.apply(&k), normalize(v, case)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| normalize(v, case)).collect())
        }
        other => other,
    }
}

pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                None | Some('_') | Some('-') => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) => p.is_uppercase() && next.is_some_and(|n| n.is_lowercase()),
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;

    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("bootDiskSizeGb"), "boot_disk_size_gb");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("team-a"), "team-a");
        assert_eq!(to_snake_case("gpu2Count"), "gpu2_count");
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(to_camel_case("boot_disk_size_gb"), "bootDiskSizeGb");
        assert_eq!(to_camel_case("_private"), "private");
        assert_eq!(to_camel_case("displayName"), "displayName");
    }

    #[test]
    fn drops_nulls_recursively() {
        let input = json!({
            "displayName": "job",
            "tensorboard": null,
            "workerPoolSpecs": [
                {"machineSpec": {"machineType": "n1", "acceleratorType": null}, "diskSpec": null}
            ],
            "args": [null, 1]
        });

        let expected = json!({
            "display_name": "job",
            "worker_pool_specs": [
                {"machine_spec": {"machine_type": "n1"}}
            ],
            "args": [null, 1]
        });

        assert_eq!(normalize(input, KeyCase::Snake), expected);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = json!({
            "jobConfig": {"workers": [{"replicaCount": 2, "gpu": null}], "labels": {"team-a": "x"}},
            "imageRefs": ["a", "b"],
            "nested": {"deeper": {"stillDeeper": null, "kept": true}}
        });

        for case in [KeyCase::Snake, KeyCase::Camel] {
            let once = normalize(input.clone(), case);
            let twice = normalize(once.clone(), case);
            assert_eq!(once, twice);
        }
    }
}
