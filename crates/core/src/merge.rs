use std::fmt;
use std::ops::Deref;

use crate::cache::CacheableMetadata;
use crate::entity::ContentEntity;
use crate::field_value::FieldValue;
use crate::override_map::OverrideMap;

/// The host field item an override was read through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideSource {
    pub host_entity_type: String,
    pub host_bundle: String,
    /// `{field_name}.{delta}` of the item on the host entity.
    pub property_path: String,
    pub host_cache: CacheableMetadata,
}

impl fmt::Display for OverrideSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}",
            self.host_entity_type, self.host_bundle, self.property_path
        )
    }
}

/// Transient clone of a target entity with an override map applied.
/// Never persisted; built fresh on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntityView {
    entity: ContentEntity,
    marker: Option<String>,
}

impl MergedEntityView {
    /// A view without overrides.
    pub fn unmodified(entity: ContentEntity) -> Self {
        Self { entity, marker: None }
    }

    /// `"{entityType}:{bundle}.{propertyPath}"` of the field item that
    /// produced the merge, when any override was applied.
    pub fn override_marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn is_overridden(&self) -> bool {
        self.marker.is_some()
    }

    pub fn entity(&self) -> &ContentEntity {
        &self.entity
    }

    pub fn cache_metadata_mut(&mut self) -> &mut CacheableMetadata {
        self.entity.cache_metadata_mut()
    }

    pub fn into_entity(self) -> ContentEntity {
        self.entity
    }
}

impl Deref for MergedEntityView {
    type Target = ContentEntity;

    fn deref(&self) -> &ContentEntity {
        &self.entity
    }
}

/// Keep only the entries of `patch` whose keys exist in `current`.
pub fn intersect_keys(patch: &FieldValue, current: &FieldValue) -> FieldValue {
    match patch {
        FieldValue::List(items) => FieldValue::List(
            items
                .iter()
                .enumerate()
                .filter(|(i, _)| current.contains_key(&i.to_string()))
                .map(|(_, v)| v.clone())
                .collect(),
        ),
        FieldValue::Map(map) => FieldValue::Map(
            map.iter()
                .filter(|(k, _)| current.contains_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Recursively merge `patch` onto `base`; `patch` wins on conflicting
/// scalars, positions and keys are preserved.
pub fn merge_deep(base: &FieldValue, patch: &FieldValue) -> FieldValue {
    if !(base.is_structured() && patch.is_structured()) {
        return patch.clone();
    }
    let mut merged = base.clone();
    for (key, value) in patch.entries() {
        let next = match base.get(&key) {
            Some(existing) if existing.is_structured() && value.is_structured() => {
                merge_deep(existing, value)
            }
            _ => value.clone(),
        };
        merged.set_path(&[key.as_str()], next);
    }
    merged
}

/// Merge one override value onto the field's current value.
fn merged_field_value(current: Option<&FieldValue>, value: &FieldValue) -> FieldValue {
    if !value.is_structured() || value.is_empty() {
        return value.clone();
    }
    match current {
        Some(current) if current.is_structured() && !current.is_empty() => {
            let filtered = intersect_keys(value, current);
            merge_deep(current, &filtered)
        }
        _ => value.clone(),
    }
}

/// Produce the merged view of `target` as seen through one reference item.
///
/// Overrides land on the translation matching `langcode` when the target has
/// one. Field names unknown to the target are set anyway; they only fail
/// when the entity is validated for saving.
pub fn apply_overrides(
    target: &ContentEntity,
    map: &OverrideMap,
    langcode: &str,
    source: &OverrideSource,
) -> MergedEntityView {
    let mut entity = target.clone();
    let lang = if target.has_translation(langcode) {
        langcode
    } else {
        target.langcode()
    };

    for (field_name, value) in map {
        let merged = merged_field_value(entity.get_translated(lang, field_name), value);
        entity.set_translated(lang, field_name, merged);
    }

    if map.is_empty() {
        return MergedEntityView::unmodified(entity);
    }

    let cache = entity.cache_metadata_mut();
    cache.add_cacheable_dependency(target.cache_metadata());
    cache.add_cacheable_dependency(&source.host_cache);

    tracing::debug!(
        target_id = %target.id(),
        source = %source,
        fields = map.len(),
        "applied reference overrides"
    );

    MergedEntityView {
        entity,
        marker: Some(source.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source() -> OverrideSource {
        OverrideSource {
            host_entity_type: "entity_test".into(),
            host_bundle: "entity_test".into(),
            property_path: "field_reference_override.0".into(),
            host_cache: CacheableMetadata::new(),
        }
    }

    #[test]
    fn shape_intersection_drops_unknown_subkeys() {
        let current = FieldValue::map([("a", 1i64), ("b", 2i64)]);
        let patch = FieldValue::map([("a", 9i64), ("c", 5i64)]);
        let merged = merge_deep(&current, &intersect_keys(&patch, &current));
        assert_eq!(merged, FieldValue::map([("a", 9i64), ("b", 2i64)]));
    }

    #[test]
    fn deep_merge_keeps_sibling_properties() {
        let current = FieldValue::List(vec![FieldValue::map([
            ("value", "Original"),
            ("format", "plain_text"),
        ])]);
        let patch = FieldValue::List(vec![
            FieldValue::map([("value", "Overridden")]),
            FieldValue::map([("value", "Extra item")]),
        ]);
        let merged = merged_field_value(Some(&current), &patch);
        assert_eq!(
            merged,
            FieldValue::List(vec![FieldValue::map([
                ("value", "Overridden"),
                ("format", "plain_text"),
            ])])
        );
    }

    #[test]
    fn scalar_and_empty_values_replace() {
        let current = FieldValue::List(vec![FieldValue::map([("value", "x")])]);
        assert_eq!(merged_field_value(Some(&current), &"y".into()), FieldValue::from("y"));
        assert_eq!(
            merged_field_value(Some(&current), &FieldValue::List(Vec::new())),
            FieldValue::List(Vec::new())
        );
    }

    #[test]
    fn structured_override_onto_empty_field_is_taken_whole() {
        let patch = FieldValue::map([("value", "new")]);
        assert_eq!(merged_field_value(None, &patch), patch);
    }

    #[test]
    fn merge_does_not_touch_target_and_is_repeatable() {
        let mut target = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        target.set("field_description", "Description".into());
        let mut map = OverrideMap::new();
        map.insert("field_description", "Overridden".into());

        let first = apply_overrides(&target, &map, "en", &source());
        let second = apply_overrides(&target, &map, "en", &source());

        assert_eq!(first.fields(), second.fields());
        assert_eq!(first.main_value("field_description"), Some(&FieldValue::from("Overridden")));
        assert_eq!(target.main_value("field_description"), Some(&FieldValue::from("Description")));
        assert_eq!(
            first.override_marker(),
            Some("entity_test:entity_test.field_reference_override.0")
        );
    }

    #[test]
    fn empty_map_has_no_marker() {
        let target = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        let view = apply_overrides(&target, &OverrideMap::new(), "en", &source());
        assert!(!view.is_overridden());
        assert_eq!(view.entity(), &target);
    }

    #[test]
    fn overrides_land_on_matching_translation() {
        let mut target = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        target.set("field_description", "English".into());
        target.add_translation(
            "fr",
            BTreeMap::from([("field_description".to_string(), FieldValue::from("Français"))]),
        );
        let mut map = OverrideMap::new();
        map.insert("field_description", "Remplacé".into());

        let view = apply_overrides(&target, &map, "fr", &source());
        assert_eq!(
            view.main_value_translated("fr", "field_description"),
            Some(&FieldValue::from("Remplacé"))
        );
        assert_eq!(view.main_value("field_description"), Some(&FieldValue::from("English")));
    }

    #[test]
    fn unknown_field_is_set_softly() {
        let target = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        let mut map = OverrideMap::new();
        map.insert("field_missing", "x".into());
        let view = apply_overrides(&target, &map, "en", &source());
        assert_eq!(view.get("field_missing"), Some(&FieldValue::from("x")));
    }
}
