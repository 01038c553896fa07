use entity_override_core::{
    ContentEntity, EntityLoader, FieldValue, OverrideMap, OverrideReferenceList,
};
use entity_override_storage::StorageError;

use crate::config::WidgetSettings;
use crate::error::EngineError;
use crate::form::{AjaxEvent, AjaxSettings, ElementKind, FormElement, WidgetOperation};
use crate::form_state::OVERRIDE_MAP_KEY;
use crate::registry::{BaseFieldDefinition, EntityTypeRegistry, FieldKind, Violation};

pub const EDIT_KEY: &str = "edit";
pub const SUBFORM_KEY: &str = "subform";
pub const CONFIRM_KEY: &str = "confirm";

pub struct SubformContext<'a> {
    pub loader: &'a dyn EntityLoader<Error = StorageError>,
    pub registry: &'a EntityTypeRegistry,
    pub settings: &'a WidgetSettings,
    /// Whether this delta's subform is open.
    pub open: bool,
    /// Levels from the edit and confirm controls up to the replaced fragment.
    pub replace_levels: usize,
}

/// Id of the hidden carrier holding a delta's encoded override map.
pub fn override_map_element_id(field_name: &str, delta: usize) -> String {
    format!("{field_name}-{delta}-entity-reference-override-map")
}

/// Build the override controls for one delta: a miniature edit form over
/// the overridable fields of its target, shared by every override widget.
///
/// The returned container's children are meant to be merged into the
/// delta's element: the hidden map carrier always, and when the target can
/// be loaded, the edit button, the subform seeded from the merged view and
/// the subform's confirm button.
pub fn build_overridable_subform(
    items: &OverrideReferenceList,
    delta: usize,
    ctx: &SubformContext<'_>,
) -> Result<FormElement, EngineError> {
    let item = items.get(delta).ok_or_else(|| EngineError::InvalidDelta {
        field: items.field_name().to_string(),
        delta,
    })?;

    let mut element = FormElement::container().with_delta(delta);
    element.insert(
        OVERRIDE_MAP_KEY,
        FormElement::new(ElementKind::Hidden)
            .with_default(FieldValue::Text(item.overwritten_property_map.clone()))
            .with_attribute("id", override_map_element_id(items.field_name(), delta))
            .with_delta(delta),
    );

    let Some(merged) = items.resolved_entity(delta, ctx.loader)? else {
        tracing::debug!(field = items.field_name(), delta, "no target to override");
        return Ok(element);
    };
    let Some(bundle) = ctx.registry.bundle(merged.entity_type(), merged.bundle()) else {
        tracing::debug!(
            field = items.field_name(),
            delta,
            bundle = merged.bundle(),
            "target bundle not registered"
        );
        return Ok(element);
    };

    let target_label = merged.label().unwrap_or_default().to_string();
    element.insert(
        EDIT_KEY,
        FormElement::new(ElementKind::Button)
            .with_title(ctx.settings.edit_label(&target_label, &bundle.label))
            .with_attribute("class", "entity-reference-override-edit")
            .with_ajax(AjaxSettings::new(
                WidgetOperation::OpenSubform,
                &[AjaxEvent::Click],
                ctx.replace_levels,
            ))
            .with_delta(delta),
    );

    let mut subform = FormElement::container().with_title(target_label).with_delta(delta);
    subform.access = ctx.open;
    subform.attributes.insert("class".into(), "ui-dialog".into());
    for field in ctx.settings.overridable(bundle) {
        let current = merged
            .get_translated(items.langcode(), &field.name)
            .cloned()
            .unwrap_or_else(|| field.empty_value());
        let mut input = value_element(field, &current, true);
        input.title = Some(field.label.clone());
        subform.insert(field.name.clone(), input);
    }
    element.insert(SUBFORM_KEY, subform);

    let mut confirm = FormElement::new(ElementKind::Submit)
        .with_title("Save")
        .with_attribute("class", "form-submit")
        .with_ajax(AjaxSettings::new(
            WidgetOperation::ConfirmSubform,
            &[AjaxEvent::Click],
            ctx.replace_levels,
        ))
        .with_delta(delta);
    confirm.access = ctx.open;
    element.insert(CONFIRM_KEY, confirm);

    Ok(element)
}

/// Input subtree mirroring the shape of a field value.
fn value_element(field: &BaseFieldDefinition, value: &FieldValue, main: bool) -> FormElement {
    match value {
        FieldValue::List(items) => {
            let mut element = FormElement::container();
            for (i, item) in items.iter().enumerate() {
                element.insert(i.to_string(), value_element(field, item, main && i == 0));
            }
            element
        }
        FieldValue::Map(properties) => {
            let mut element = FormElement::container();
            for (key, property) in properties {
                element.insert(key.clone(), value_element(field, property, main && key == "value"));
            }
            element
        }
        leaf => {
            let kind = if main {
                match field.kind {
                    FieldKind::String => ElementKind::Textfield,
                    FieldKind::TextLong => ElementKind::Textarea,
                    FieldKind::Integer | FieldKind::Float => ElementKind::Number,
                    FieldKind::Boolean => ElementKind::Checkbox,
                }
            } else {
                match leaf {
                    FieldValue::Integer(_) | FieldValue::Float(_) => ElementKind::Number,
                    FieldValue::Boolean(_) => ElementKind::Checkbox,
                    _ => ElementKind::Textfield,
                }
            };
            FormElement::new(kind)
                .with_default(leaf.clone())
                .required(main && field.required)
        }
    }
}

/// True when every leaf is null or empty text.
fn is_blank(value: &FieldValue) -> bool {
    match value {
        FieldValue::List(_) | FieldValue::Map(_) => {
            value.entries().into_iter().all(|(_, v)| is_blank(v))
        }
        other => other.is_empty(),
    }
}

/// Turn a submitted subform into an override map.
///
/// Only overridable fields are read. Each is compared with the target's
/// own (unmerged) value in `langcode`; fields submitted unchanged are left
/// out, so submitting the original values yields an empty map.
pub fn extract_overrides(
    submitted: Option<&FieldValue>,
    original: &ContentEntity,
    langcode: &str,
    fields: &[&BaseFieldDefinition],
) -> Result<OverrideMap, Vec<Violation>> {
    let mut map = OverrideMap::new();
    let mut violations = Vec::new();
    let Some(submitted) = submitted else {
        return Ok(map);
    };

    for field in fields {
        let Some(input) = submitted.get(&field.name) else {
            continue;
        };
        let own = original.get_translated(langcode, &field.name);
        let template = own.cloned().unwrap_or_else(|| field.empty_value());
        let value = input.coerce_like(&template);

        if field.required && value.main_value().is_none_or(FieldValue::is_empty) {
            violations.push(Violation::required(field));
            continue;
        }

        let unchanged = match own {
            Some(own) => value == *own || (is_blank(&value) && is_blank(own)),
            None => is_blank(&value),
        };
        if !unchanged {
            map.insert(field.name.clone(), value);
        }
    }

    if violations.is_empty() {
        Ok(map)
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FieldKind;

    fn description() -> BaseFieldDefinition {
        BaseFieldDefinition::new("field_description", FieldKind::TextLong).required()
    }

    fn target() -> ContentEntity {
        let mut entity = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        entity.set("name", "Original name".into());
        entity.set(
            "field_description",
            FieldValue::List(vec![FieldValue::map([
                ("value", "Original description"),
                ("format", "plain_text"),
            ])]),
        );
        entity
    }

    fn submission(text: &str) -> FieldValue {
        let mut input = FieldValue::Null;
        input.set_path(&["field_description", "0", "value"], text.into());
        input.set_path(&["field_description", "0", "format"], "plain_text".into());
        input.set_path(&["name"], "Original name".into());
        input
    }

    #[test]
    fn unchanged_submission_is_empty_map() {
        let name = BaseFieldDefinition::new("name", FieldKind::String);
        let desc = description();
        let map = extract_overrides(
            Some(&submission("Original description")),
            &target(),
            "en",
            &[&name, &desc],
        )
        .unwrap();
        assert!(map.is_empty());
        assert_eq!(map.encode(), "{}");
    }

    #[test]
    fn only_changed_fields_are_kept() {
        let name = BaseFieldDefinition::new("name", FieldKind::String);
        let desc = description();
        let map = extract_overrides(
            Some(&submission("Overridden description")),
            &target(),
            "en",
            &[&name, &desc],
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("field_description").and_then(|v| v.get_path(&["0", "value"])),
            Some(&FieldValue::from("Overridden description"))
        );
    }

    #[test]
    fn emptied_required_field_is_a_violation() {
        let desc = description();
        let violations = extract_overrides(Some(&submission("")), &target(), "en", &[&desc])
            .unwrap_err();
        assert_eq!(violations[0].message, "field_description field is required.");
    }

    #[test]
    fn non_overridable_fields_are_ignored() {
        let desc = description();
        let mut input = submission("Original description");
        input.set_path(&["name"], "Sneaky".into());
        let map = extract_overrides(Some(&input), &target(), "en", &[&desc]).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn value_element_follows_shape() {
        let desc = description();
        let element = value_element(&desc, target().get("field_description").unwrap(), true);
        let value = element.get_path(&["0", "value"]).unwrap();
        assert_eq!(value.kind, ElementKind::Textarea);
        assert!(value.required);
        let format = element.get_path(&["0", "format"]).unwrap();
        assert_eq!(format.kind, ElementKind::Textfield);
        assert!(!format.required);
    }
}
