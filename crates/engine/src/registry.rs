use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use entity_override_core::{ContentEntity, FieldValue, ReferenceFieldDefinition};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    TextLong,
    Integer,
    Float,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFieldDefinition {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub translatable: bool,
}

impl BaseFieldDefinition {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            kind,
            required: false,
            translatable: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Value shape of a new, empty field of this kind.
    pub fn empty_value(&self) -> FieldValue {
        let leaf = match self.kind {
            FieldKind::String | FieldKind::TextLong => FieldValue::Text(String::new()),
            FieldKind::Integer | FieldKind::Float | FieldKind::Boolean => FieldValue::Null,
        };
        FieldValue::List(vec![FieldValue::map([("value", leaf)])])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDefinition {
    pub entity_type: String,
    pub bundle: String,
    pub label: String,
    pub fields: BTreeMap<String, BaseFieldDefinition>,
}

impl BundleDefinition {
    pub fn new(entity_type: &str, bundle: &str, label: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            bundle: bundle.to_string(),
            label: label.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: BaseFieldDefinition) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&BaseFieldDefinition> {
        self.fields.get(name)
    }
}

/// A field-level validation failure reported when saving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field_name: String,
    pub message: String,
}

impl Violation {
    pub fn required(field: &BaseFieldDefinition) -> Self {
        Self {
            field_name: field.name.clone(),
            message: format!("{} field is required.", field.label),
        }
    }
}

type BundleKey = (String, String);

/// Bundles and override reference fields known to the site.
#[derive(Debug, Default)]
pub struct EntityTypeRegistry {
    bundles: BTreeMap<BundleKey, BundleDefinition>,
    reference_fields: BTreeMap<BundleKey, Vec<ReferenceFieldDefinition>>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_bundle(&mut self, bundle: BundleDefinition) {
        let key = (bundle.entity_type.clone(), bundle.bundle.clone());
        self.bundles.insert(key, bundle);
    }

    pub fn bundle(&self, entity_type: &str, bundle: &str) -> Option<&BundleDefinition> {
        self.bundles
            .get(&(entity_type.to_string(), bundle.to_string()))
    }

    pub fn require_bundle(&self, entity_type: &str, bundle: &str) -> Result<&BundleDefinition, EngineError> {
        self.bundle(entity_type, bundle)
            .ok_or_else(|| EngineError::UnknownBundle(format!("{entity_type}:{bundle}")))
    }

    /// Attach an override reference field to its host bundle.
    pub fn add_reference_field(&mut self, definition: ReferenceFieldDefinition) -> Result<(), EngineError> {
        self.require_bundle(&definition.host_entity_type, &definition.host_bundle)?;
        let fields = self
            .reference_fields
            .entry((definition.host_entity_type.clone(), definition.host_bundle.clone()))
            .or_default();
        fields.retain(|f| f.field_name != definition.field_name);
        fields.push(definition);
        Ok(())
    }

    pub fn reference_fields(&self, entity_type: &str, bundle: &str) -> &[ReferenceFieldDefinition] {
        self.reference_fields
            .get(&(entity_type.to_string(), bundle.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Option<&ReferenceFieldDefinition> {
        self.reference_fields(entity_type, bundle)
            .iter()
            .find(|f| f.field_name == field_name)
    }

    /// Check an entity against its bundle: unknown fields and empty required
    /// fields, in every language the entity carries.
    pub fn validate(&self, entity: &ContentEntity) -> Result<Vec<Violation>, EngineError> {
        let bundle = self.require_bundle(entity.entity_type(), entity.bundle())?;
        let mut violations = Vec::new();

        let mut languages = vec![entity.fields()];
        languages.extend(entity.translations().values());
        for fields in languages {
            for name in fields.keys() {
                if bundle.field(name).is_none() {
                    violations.push(Violation {
                        field_name: name.clone(),
                        message: format!("Field {name} is unknown."),
                    });
                }
            }
        }

        for field in bundle.fields.values().filter(|f| f.required) {
            let mut langcodes = vec![entity.langcode()];
            langcodes.extend(entity.translations().keys().map(String::as_str));
            let missing = langcodes.iter().any(|langcode| {
                entity
                    .main_value_translated(langcode, &field.name)
                    .is_none_or(FieldValue::is_empty)
            });
            if missing {
                violations.push(Violation::required(field));
            }
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityTypeRegistry {
        let mut registry = EntityTypeRegistry::new();
        registry.register_bundle(
            BundleDefinition::new("entity_test_mul", "entity_test_mul", "Test entity - data table")
                .with_field(BaseFieldDefinition::new("name", FieldKind::String))
                .with_field(
                    BaseFieldDefinition::new("field_description", FieldKind::TextLong)
                        .required()
                        .translatable(),
                ),
        );
        registry
    }

    #[test]
    fn required_and_unknown_fields() -> Result<(), EngineError> {
        let registry = registry();
        let mut entity = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        entity.set("field_bogus", "x".into());

        let violations = registry.validate(&entity)?;
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.message == "field_description field is required."));
        assert!(violations.iter().any(|v| v.field_name == "field_bogus"));

        entity.remove("field_bogus");
        entity.set("field_description", "Filled".into());
        assert!(registry.validate(&entity)?.is_empty());
        Ok(())
    }

    #[test]
    fn reference_field_needs_host_bundle() {
        let mut registry = registry();
        let def = ReferenceFieldDefinition::new(
            "node",
            "article",
            "field_ref",
            "entity_test_mul",
            entity_override_core::Cardinality::Unlimited,
        );
        assert!(matches!(
            registry.add_reference_field(def),
            Err(EngineError::UnknownBundle(_))
        ));
    }
}
