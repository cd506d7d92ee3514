//! Flatmap state shim
//!
//! Transcodes a nested [`AttributeValue`] tree into the legacy flat
//! representation: dotted paths for every leaf plus `.#` (list length) and
//! `.%` (map size) cardinality keys for every container.
//!
//! ```text
//! {"tags": ["a", "b"]}   =>   % = 1, tags.# = 2, tags.0 = a, tags.1 = b
//! ```
//!
//! Null leaves are written as the empty string, so a null and an empty
//! string cannot be told apart once flattened.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// Cardinality suffix for lists
pub const LIST_COUNT: &str = "#";
/// Cardinality suffix for maps
pub const MAP_COUNT: &str = "%";

/// Flat, order-independent view of an attribute tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatAttributeMap(BTreeMap<String, String>);

impl FlatAttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Copy of this map without the keys rejected by `keep`
    pub fn filtered<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&str, &str) -> bool,
    {
        Self(
            self.0
                .iter()
                .filter(|(k, v)| keep(k, v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }

    fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }
}

impl From<BTreeMap<String, String>> for FlatAttributeMap {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatAttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for FlatAttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.0 {
            writeln!(f, "{} = {:?}", k, v)?;
        }
        Ok(())
    }
}

/// Flatten a whole tree. A map root yields a `%` key, a list root a `#` key.
pub fn to_flat_map(tree: &AttributeValue) -> FlatAttributeMap {
    let mut out = FlatAttributeMap::new();
    add_entry(&mut out, "", tree);
    out
}

/// Flatten `tree` under `prefix`
pub fn to_flat_map_at(prefix: &str, tree: &AttributeValue) -> FlatAttributeMap {
    let mut out = FlatAttributeMap::new();
    add_entry(&mut out, prefix, tree);
    out
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

fn add_entry(out: &mut FlatAttributeMap, path: &str, value: &AttributeValue) {
    match value {
        AttributeValue::Null => out.insert(path.to_string(), String::new()),
        AttributeValue::Bool(b) => out.insert(path.to_string(), b.to_string()),
        AttributeValue::Number(n) => out.insert(path.to_string(), format_number(n)),
        AttributeValue::String(s) => out.insert(path.to_string(), s.clone()),
        AttributeValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                add_entry(out, &join(path, &index.to_string()), item);
            }
            out.insert(join(path, LIST_COUNT), items.len().to_string());
        }
        AttributeValue::Map(entries) => {
            for (key, item) in entries {
                add_entry(out, &join(path, key), item);
            }
            out.insert(join(path, MAP_COUNT), entries.len().to_string());
        }
    }
}

/// Shortest decimal that round-trips, never in exponent form
pub fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        // f64's Display is the shortest round-trip form and never uses exponents
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{bool_value, float_value, int_value, list_value, make_map, string_value};
    use test_case::test_case;

    fn flat(pairs: &[(&str, &str)]) -> FlatAttributeMap {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_list_cardinality() {
        let tree = list_value(vec![string_value("a"), string_value("b"), string_value("c")]);
        assert_eq!(
            to_flat_map_at("tags", &tree),
            flat(&[("tags.#", "3"), ("tags.0", "a"), ("tags.1", "b"), ("tags.2", "c")])
        );
    }

    #[test]
    fn test_map_cardinality_is_order_independent() {
        let forward = make_map(vec![("k1", string_value("v1")), ("k2", string_value("v2"))]);
        let reverse = make_map(vec![("k2", string_value("v2")), ("k1", string_value("v1"))]);
        let expected = flat(&[("m.%", "2"), ("m.k1", "v1"), ("m.k2", "v2")]);

        assert_eq!(to_flat_map_at("m", &forward), expected);
        assert_eq!(to_flat_map_at("m", &reverse), expected);
    }

    #[test]
    fn test_list_of_maps() {
        let tree = list_value(vec![
            make_map(vec![("a", int_value(1))]),
            make_map(vec![("a", int_value(2))]),
        ]);
        assert_eq!(
            to_flat_map_at("p", &tree),
            flat(&[
                ("p.#", "2"),
                ("p.0.%", "1"),
                ("p.0.a", "1"),
                ("p.1.%", "1"),
                ("p.1.a", "2"),
            ])
        );
    }

    #[test]
    fn test_empty_containers_still_count() {
        let tree = make_map(vec![
            ("list", list_value(vec![])),
            ("map", make_map(vec![])),
        ]);
        assert_eq!(
            to_flat_map(&tree),
            flat(&[("%", "2"), ("list.#", "0"), ("map.%", "0")])
        );
    }

    #[test]
    fn test_null_is_empty_string() {
        let tree = make_map(vec![("gone", AttributeValue::Null), ("blank", string_value(""))]);
        let out = to_flat_map(&tree);
        assert_eq!(out.get("gone"), Some(""));
        assert_eq!(out.get("gone"), out.get("blank"));
    }

    #[test_case(bool_value(true), "true" ; "bool true")]
    #[test_case(bool_value(false), "false" ; "bool false")]
    #[test_case(int_value(42), "42" ; "integer")]
    #[test_case(int_value(-7), "-7" ; "negative integer")]
    #[test_case(float_value(1.5), "1.5" ; "fraction")]
    #[test_case(float_value(2.0), "2" ; "integral float")]
    #[test_case(float_value(0.1), "0.1" ; "shortest form")]
    #[test_case(float_value(1e21), "1000000000000000000000" ; "no exponent")]
    fn test_scalar_rendering(value: AttributeValue, expected: &str) {
        assert_eq!(to_flat_map_at("v", &value).get("v"), Some(expected));
    }

    #[test]
    fn test_number_from_json_text() {
        let tree: AttributeValue = serde_json::from_str(r#"{"n": 3.250, "big": 18446744073709551615}"#).unwrap();
        let out = to_flat_map(&tree);
        assert_eq!(out.get("n"), Some("3.25"));
        assert_eq!(out.get("big"), Some("18446744073709551615"));
    }

    #[test]
    fn test_every_container_has_count() {
        let tree: AttributeValue = serde_json::from_str(
            r#"{"id":"x","rules":[{"ports":[80,443],"labels":{"a":"b"}}]}"#,
        )
        .unwrap();
        let out = to_flat_map(&tree);

        assert_eq!(out.get("%"), Some("2"));
        assert_eq!(out.get("rules.#"), Some("1"));
        assert_eq!(out.get("rules.0.%"), Some("2"));
        assert_eq!(out.get("rules.0.ports.#"), Some("2"));
        assert_eq!(out.get("rules.0.ports.1"), Some("443"));
        assert_eq!(out.get("rules.0.labels.%"), Some("1"));
        assert_eq!(out.get("rules.0.labels.a"), Some("b"));
    }
}
