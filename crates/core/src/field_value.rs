use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A field value as held by an entity, an override map or raw form input.
///
/// Structured values are either positional (`List`, the usual shape of a
/// multi-item field) or keyed (`Map`, the properties of one item). Both are
/// addressed with string keys; list positions are their decimal index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl FieldValue {
    /// Build a keyed value from `(key, value)` pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn empty_map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Null, the empty string and empty structures are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, FieldValue::List(_) | FieldValue::Map(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Keyed view over a structured value; scalars have no entries.
    pub fn entries(&self) -> Vec<(String, &FieldValue)> {
        match self {
            FieldValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            FieldValue::Map(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            _ => Vec::new(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            FieldValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut FieldValue> {
        match self {
            FieldValue::List(items) => match key.parse::<usize>() {
                Ok(i) => items.get_mut(i),
                Err(_) => None,
            },
            FieldValue::Map(map) => map.get_mut(key),
            _ => None,
        }
    }

    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&FieldValue> {
        path.iter()
            .try_fold(self, |node, key| node.get(key.as_ref()))
    }

    /// Set a nested value, creating keyed containers along the way.
    ///
    /// A scalar standing where a container is needed is replaced. A list
    /// accepts existing positions and one-past-the-end appends; any other key
    /// turns it into a keyed container.
    pub fn set_path<S: AsRef<str>>(&mut self, path: &[S], value: FieldValue) {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return;
        };
        let key = first.as_ref();

        if let FieldValue::List(items) = self {
            match key.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    items[i].set_path(rest, value);
                    return;
                }
                Ok(i) if i == items.len() => {
                    let mut child = FieldValue::Null;
                    child.set_path(rest, value);
                    items.push(child);
                    return;
                }
                _ => {
                    let converted = std::mem::take(items)
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v))
                        .collect();
                    *self = FieldValue::Map(converted);
                }
            }
        }

        if !matches!(self, FieldValue::Map(_)) {
            *self = FieldValue::empty_map();
        }
        if let FieldValue::Map(map) = self {
            map.entry(key.to_string())
                .or_insert(FieldValue::Null)
                .set_path(rest, value);
        }
    }

    pub fn remove_key(&mut self, key: &str) -> Option<FieldValue> {
        match self {
            FieldValue::Map(map) => map.remove(key),
            FieldValue::List(items) => match key.parse::<usize>() {
                Ok(i) if i < items.len() => Some(items.remove(i)),
                _ => None,
            },
            _ => None,
        }
    }

    /// The main property of a field: the `value` of the first item, or the
    /// scalar itself for fields held in shorthand form.
    pub fn main_value(&self) -> Option<&FieldValue> {
        match self {
            FieldValue::List(items) => items.first().and_then(|first| first.main_value()),
            FieldValue::Map(map) => map.get("value"),
            FieldValue::Null => None,
            scalar => Some(scalar),
        }
    }

    /// Reshape raw text input so it compares against `template`.
    ///
    /// Form input arrives as text; leaves are parsed to the scalar type found
    /// at the same position in `template`. Unparseable leaves stay text, and
    /// so do `NaN` and infinities, which JSON cannot carry.
    pub fn coerce_like(&self, template: &FieldValue) -> FieldValue {
        match (self, template) {
            (FieldValue::Text(s), FieldValue::Integer(_)) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .unwrap_or_else(|_| self.clone()),
            (FieldValue::Text(s), FieldValue::Float(_)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FieldValue::Float)
                .unwrap_or_else(|| self.clone()),
            (FieldValue::Text(s), FieldValue::Boolean(_)) => match s.trim() {
                "1" | "true" | "on" => FieldValue::Boolean(true),
                "" | "0" | "false" | "off" => FieldValue::Boolean(false),
                _ => self.clone(),
            },
            (FieldValue::Text(s), FieldValue::Null) if s.is_empty() => FieldValue::Null,
            (FieldValue::Map(input), FieldValue::List(shape)) => {
                let mut out: Vec<FieldValue> = Vec::new();
                let mut extra = BTreeMap::new();
                for (key, value) in input {
                    match key.parse::<usize>() {
                        Ok(i) if i == out.len() => {
                            let coerced = match shape.get(i) {
                                Some(t) => value.coerce_like(t),
                                None => value.clone(),
                            };
                            out.push(coerced);
                        }
                        _ => {
                            extra.insert(key.clone(), value.clone());
                        }
                    }
                }
                if extra.is_empty() {
                    FieldValue::List(out)
                } else {
                    self.clone()
                }
            }
            (FieldValue::List(input), FieldValue::List(shape)) => FieldValue::List(
                input
                    .iter()
                    .enumerate()
                    .map(|(i, v)| match shape.get(i) {
                        Some(t) => v.coerce_like(t),
                        None => v.clone(),
                    })
                    .collect(),
            ),
            (FieldValue::Map(input), FieldValue::Map(shape)) => FieldValue::Map(
                input
                    .iter()
                    .map(|(k, v)| {
                        let coerced = match shape.get(k) {
                            Some(t) => v.coerce_like(t),
                            None => v.clone(),
                        };
                        (k.clone(), coerced)
                    })
                    .collect(),
            ),
            _ => self.clone(),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_path_builds_nested_maps() {
        let mut root = FieldValue::Null;
        root.set_path(&["field", "0", "target_id"], "abc".into());
        assert_eq!(
            root.get_path(&["field", "0", "target_id"]),
            Some(&FieldValue::Text("abc".into()))
        );
        assert!(root.get("field").and_then(|f| f.as_map()).is_some());
    }

    #[test]
    fn list_positions_are_string_keys() {
        let value = FieldValue::List(vec![FieldValue::map([("value", "x")])]);
        assert_eq!(value.get_path(&["0", "value"]), Some(&FieldValue::from("x")));
        assert_eq!(value.get("1"), None);
        assert_eq!(value.main_value(), Some(&FieldValue::from("x")));
    }

    #[test]
    fn coerce_text_leaves_to_template_types() {
        let template = FieldValue::List(vec![FieldValue::map([
            ("value", FieldValue::Integer(3)),
            ("enabled", FieldValue::Boolean(true)),
        ])]);
        let mut input = FieldValue::Null;
        input.set_path(&["0", "value"], "7".into());
        input.set_path(&["0", "enabled"], "0".into());

        let coerced = input.coerce_like(&template);
        assert_eq!(
            coerced,
            FieldValue::List(vec![FieldValue::map([
                ("value", FieldValue::Integer(7)),
                ("enabled", FieldValue::Boolean(false)),
            ])])
        );
    }

    #[test]
    fn non_finite_floats_stay_text() {
        let template = FieldValue::Float(1.5);
        assert_eq!(FieldValue::from("2.25").coerce_like(&template), FieldValue::Float(2.25));
        for raw in ["NaN", "inf", "-infinity"] {
            assert_eq!(FieldValue::from(raw).coerce_like(&template), FieldValue::from(raw));
        }
    }

    #[test]
    fn msgpack_preserves_shape() {
        let value = FieldValue::List(vec![FieldValue::map([
            ("value", FieldValue::from("Description")),
            ("format", FieldValue::from("plain_text")),
        ])]);
        let bytes = value.to_msgpack().unwrap();
        assert_eq!(FieldValue::from_msgpack(&bytes).unwrap(), value);
    }
}
