use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::registry::{BaseFieldDefinition, BundleDefinition};

/// Settings of an override widget as stored in the form display.
///
/// Every key is optional; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetSettings {
    /// Form mode the subform mirrors.
    pub form_mode: String,
    /// Fields of the target that may be overridden. Empty means every field
    /// of the target bundle.
    pub overridable_fields: Vec<String>,
    pub match_operator: String,
    pub size: u32,
    pub placeholder: String,
    /// Label of the per-delta edit button. `{label}` is replaced with the
    /// target's label and `{bundle}` with its bundle label.
    pub edit_button_label: String,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            form_mode: "default".to_string(),
            overridable_fields: Vec::new(),
            match_operator: "CONTAINS".to_string(),
            size: 60,
            placeholder: String::new(),
            edit_button_label: "Edit {bundle}".to_string(),
        }
    }
}

impl WidgetSettings {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Overridable fields of `bundle`, in bundle order.
    pub fn overridable<'a>(&self, bundle: &'a BundleDefinition) -> Vec<&'a BaseFieldDefinition> {
        bundle
            .fields
            .values()
            .filter(|field| {
                self.overridable_fields.is_empty() || self.overridable_fields.contains(&field.name)
            })
            .collect()
    }

    pub fn edit_label(&self, target_label: &str, bundle_label: &str) -> String {
        self.edit_button_label
            .replace("{label}", target_label)
            .replace("{bundle}", bundle_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FieldKind;

    #[test]
    fn missing_keys_take_defaults() -> Result<(), EngineError> {
        let settings = WidgetSettings::from_json(r#"{"overridable_fields": ["field_description"]}"#)?;
        assert_eq!(settings.form_mode, "default");
        assert_eq!(settings.size, 60);
        assert_eq!(settings.overridable_fields, vec!["field_description".to_string()]);
        Ok(())
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(matches!(
            WidgetSettings::from_json(r#"{"size": "big"}"#),
            Err(EngineError::Settings(_))
        ));
    }

    #[test]
    fn overridable_filters_bundle_fields() {
        let bundle = BundleDefinition::new("entity_test_mul", "entity_test_mul", "Test")
            .with_field(BaseFieldDefinition::new("name", FieldKind::String))
            .with_field(BaseFieldDefinition::new("field_description", FieldKind::TextLong));

        let all = WidgetSettings::default();
        assert_eq!(all.overridable(&bundle).len(), 2);

        let some = WidgetSettings {
            overridable_fields: vec!["field_description".into()],
            ..WidgetSettings::default()
        };
        let names: Vec<_> = some.overridable(&bundle).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["field_description"]);
    }

    #[test]
    fn edit_label_placeholders() {
        let settings = WidgetSettings::default();
        assert_eq!(
            settings.edit_label("Original name", "Test entity - data table"),
            "Edit Test entity - data table"
        );
    }
}
