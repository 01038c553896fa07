use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field_value::FieldValue;

/// Canonical at-rest form of a map without overrides.
pub const EMPTY_OVERRIDE_MAP: &str = "{}";

/// Sparse per-reference patch: field name to the value that replaces the
/// target entity's own value when viewed through the reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideMap(BTreeMap<String, FieldValue>);

impl OverrideMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parse the stored form. Absent, blank or malformed input yields an
    /// empty map; a bad map must never break entity load.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::new();
        };
        match serde_json::from_str::<FieldValue>(raw) {
            Ok(value) => Self::from_value(value),
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed override map");
                Self::new()
            }
        }
    }

    /// Interpret an already-parsed value. Only a keyed value is a map; an
    /// empty list is the empty token older writers produced.
    pub fn from_value(value: FieldValue) -> Self {
        match value {
            FieldValue::Map(map) => Self(map),
            FieldValue::List(items) if items.is_empty() => Self::new(),
            FieldValue::Null => Self::new(),
            other => {
                tracing::warn!(?other, "override map is not a keyed value");
                Self::new()
            }
        }
    }

    /// Non-finite floats encode as `null`; form input never produces them.
    pub fn encode(&self) -> String {
        if self.0.is_empty() {
            return EMPTY_OVERRIDE_MAP.to_string();
        }
        // A map of FieldValue always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| EMPTY_OVERRIDE_MAP.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldValue> {
        self.0.get(field_name)
    }

    pub fn contains(&self, field_name: &str) -> bool {
        self.0.contains_key(field_name)
    }

    pub fn insert(&mut self, field_name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(field_name.into(), value)
    }

    pub fn remove(&mut self, field_name: &str) -> Option<FieldValue> {
        self.0.remove(field_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, FieldValue)> for OverrideMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OverrideMap {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_encodes_to_object_token() {
        assert_eq!(OverrideMap::new().encode(), "{}");
    }

    #[test]
    fn round_trip() {
        let mut map = OverrideMap::new();
        map.insert("field_description", "Overridden".into());
        map.insert(
            "field_tags",
            FieldValue::List(vec![FieldValue::from("a"), FieldValue::from("b")]),
        );
        map.insert("field_weight", FieldValue::Integer(4));
        assert_eq!(OverrideMap::decode(Some(&map.encode())), map);
    }

    #[test]
    fn malformed_input_fails_open() {
        assert!(OverrideMap::decode(Some("{not json")).is_empty());
        assert!(OverrideMap::decode(Some("\"a string\"")).is_empty());
        assert!(OverrideMap::decode(Some("[1, 2]")).is_empty());
        assert!(OverrideMap::decode(Some("   ")).is_empty());
        assert!(OverrideMap::decode(None).is_empty());
    }

    #[test]
    fn empty_list_token_is_empty_map() {
        assert!(OverrideMap::decode(Some("[]")).is_empty());
    }

    #[test]
    fn nested_values_decode() {
        let map = OverrideMap::decode(Some(
            r#"{"field_description":[{"value":"New","format":"plain_text"}]}"#,
        ));
        let value = map.get("field_description").unwrap();
        assert_eq!(value.get_path(&["0", "value"]), Some(&FieldValue::from("New")));
    }
}
