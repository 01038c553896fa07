use std::collections::BTreeMap;

use crate::cache::CacheableMetadata;
use crate::field_value::FieldValue;
use crate::ids::EntityId;

/// Field name holding an entity's label.
pub const LABEL_FIELD: &str = "name";

/// A fieldable content entity with optional per-language translations.
///
/// `fields` hold the values in the entity's own language. A translation
/// holds only the fields that differ in that language; reads through a
/// translation fall back to the original values.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntity {
    entity_type: String,
    bundle: String,
    id: EntityId,
    langcode: String,
    fields: BTreeMap<String, FieldValue>,
    translations: BTreeMap<String, BTreeMap<String, FieldValue>>,
    cache: CacheableMetadata,
}

impl ContentEntity {
    pub fn new(entity_type: &str, bundle: &str, langcode: &str) -> Self {
        Self::with_id(EntityId::new(), entity_type, bundle, langcode)
    }

    pub fn with_id(id: EntityId, entity_type: &str, bundle: &str, langcode: &str) -> Self {
        let mut cache = CacheableMetadata::new();
        cache.add_cache_tag(format!("{entity_type}:{id}"));
        Self {
            entity_type: entity_type.to_string(),
            bundle: bundle.to_string(),
            id,
            langcode: langcode.to_string(),
            fields: BTreeMap::new(),
            translations: BTreeMap::new(),
            cache,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn langcode(&self) -> &str {
        &self.langcode
    }

    pub fn label(&self) -> Option<&str> {
        self.fields
            .get(LABEL_FIELD)
            .and_then(FieldValue::main_value)
            .and_then(FieldValue::as_text)
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldValue> {
        self.fields.get(field_name)
    }

    /// Main property of a field, e.g. the text of a description.
    pub fn main_value(&self, field_name: &str) -> Option<&FieldValue> {
        self.fields.get(field_name).and_then(FieldValue::main_value)
    }

    pub fn set(&mut self, field_name: &str, value: FieldValue) {
        self.fields.insert(field_name.to_string(), value);
    }

    pub fn remove(&mut self, field_name: &str) -> Option<FieldValue> {
        self.fields.remove(field_name)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn has_translation(&self, langcode: &str) -> bool {
        langcode == self.langcode || self.translations.contains_key(langcode)
    }

    pub fn add_translation(&mut self, langcode: &str, fields: BTreeMap<String, FieldValue>) {
        if langcode == self.langcode {
            self.fields.extend(fields);
        } else {
            self.translations.insert(langcode.to_string(), fields);
        }
    }

    pub fn translations(&self) -> &BTreeMap<String, BTreeMap<String, FieldValue>> {
        &self.translations
    }

    /// Value of a field as seen in `langcode`, falling back to the original.
    pub fn get_translated(&self, langcode: &str, field_name: &str) -> Option<&FieldValue> {
        self.translations
            .get(langcode)
            .and_then(|t| t.get(field_name))
            .or_else(|| self.fields.get(field_name))
    }

    pub fn main_value_translated(&self, langcode: &str, field_name: &str) -> Option<&FieldValue> {
        self.get_translated(langcode, field_name)
            .and_then(FieldValue::main_value)
    }

    /// Set a field on the translation for `langcode`. Writes to the original
    /// values when `langcode` is the entity's own language or has no
    /// translation.
    pub fn set_translated(&mut self, langcode: &str, field_name: &str, value: FieldValue) {
        match self.translations.get_mut(langcode) {
            Some(translation) if langcode != self.langcode => {
                translation.insert(field_name.to_string(), value);
            }
            _ => self.set(field_name, value),
        }
    }

    pub fn cache_metadata(&self) -> &CacheableMetadata {
        &self.cache
    }

    pub fn cache_metadata_mut(&mut self) -> &mut CacheableMetadata {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_cache_tag() {
        let entity = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        let tag = format!("entity_test_mul:{}", entity.id());
        assert!(entity.cache_metadata().tags().contains(&tag));
    }

    #[test]
    fn translation_reads_fall_back() {
        let mut entity = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        entity.set("name", "Hello".into());
        entity.set("field_description", "English".into());
        entity.add_translation(
            "fr",
            BTreeMap::from([("field_description".to_string(), FieldValue::from("Français"))]),
        );

        assert!(entity.has_translation("fr"));
        assert!(entity.has_translation("en"));
        assert!(!entity.has_translation("de"));
        assert_eq!(
            entity.main_value_translated("fr", "field_description"),
            Some(&FieldValue::from("Français"))
        );
        assert_eq!(entity.main_value_translated("fr", "name"), Some(&FieldValue::from("Hello")));
        assert_eq!(entity.label(), Some("Hello"));
    }

    #[test]
    fn set_translated_leaves_original() {
        let mut entity = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        entity.set("field_description", "English".into());
        entity.add_translation("fr", BTreeMap::new());
        entity.set_translated("fr", "field_description", "Autre".into());

        assert_eq!(entity.main_value("field_description"), Some(&FieldValue::from("English")));
        assert_eq!(
            entity.main_value_translated("fr", "field_description"),
            Some(&FieldValue::from("Autre"))
        );
    }
}
