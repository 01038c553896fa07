use entity_override_core::{
    Cardinality, EntityLoader, FieldValue, OverrideReferenceItem, OverrideReferenceList,
    ReferenceFieldDefinition, EMPTY_OVERRIDE_MAP,
};
use entity_override_storage::StorageError;

use crate::config::WidgetSettings;
use crate::error::EngineError;
use crate::form::{AjaxEvent, AjaxSettings, ElementKind, FormElement, WidgetOperation};
use crate::form_state::{
    DeltaValues, FormState, WidgetPhase, WidgetStateKey, ADD_MORE_KEY, OVERRIDE_MAP_KEY,
    TARGET_ID_KEY,
};
use crate::registry::EntityTypeRegistry;
use crate::subform::{
    build_overridable_subform, extract_overrides, SubformContext, EDIT_KEY, SUBFORM_KEY,
};

pub const WIDGET_KEY: &str = "widget";
pub const REMOVE_KEY: &str = "_remove";
pub const SELECTION_KEY: &str = "selection";
pub const PREVIEW_KEY: &str = "preview";
pub const REMOVE_BUTTON_KEY: &str = "remove_button";
pub const SELECTION_INPUT_KEY: &str = "media_library_selection";
pub const UPDATE_WIDGET_KEY: &str = "media_library_update_widget";

/// Levels trimmed off a control's array parents to reach the fragment a
/// partial rebuild replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildDepth {
    /// Controls inside one delta: target, edit, confirm, remove.
    pub item_control: usize,
    /// Controls on the widget itself: add more, selection update.
    pub field_control: usize,
}

/// What a widget needs from the form being built.
pub struct WidgetContext<'a> {
    pub form_parents: &'a [String],
    pub form_state: &'a FormState,
    pub loader: &'a dyn EntityLoader<Error = StorageError>,
    pub registry: &'a EntityTypeRegistry,
}

/// Element-building contract of the plain reference widgets the override
/// widgets wrap.
pub trait BaseWidget {
    fn form_element(
        &self,
        items: &OverrideReferenceList,
        delta: usize,
        element: FormElement,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError>;
}

/// A multi-value widget rendering one element per delta, each carrying the
/// override controls from [`build_overridable_subform`]. Ajax controls
/// trigger a partial rebuild after the raw input of every delta has been
/// folded into the form session, so edits in other deltas survive it.
pub trait OverrideWidget {
    fn id(&self) -> &'static str;

    fn settings(&self) -> &WidgetSettings;

    fn depth(&self) -> RebuildDepth;

    /// Input keys between the field and its deltas.
    fn items_path(&self) -> &'static [&'static str];

    /// Build the element for the whole field. Items are first replaced with
    /// whatever the form session holds for this widget.
    fn form(
        &self,
        items: &mut OverrideReferenceList,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError>;
}

/// Replace `items` with the session's copy, if there is one.
fn restore_items(items: &mut OverrideReferenceList, key: &WidgetStateKey, form_state: &FormState) {
    let Some(values) = form_state.session().get_delta_values(key) else {
        return;
    };
    let restored = values
        .iter()
        .map(|v| {
            v.to_item().unwrap_or_else(|_| OverrideReferenceItem {
                target_id: None,
                overwritten_property_map: v.overwritten_property_map.clone(),
            })
        })
        .collect();
    items.set_items(restored);
}

fn field_container(items: &OverrideReferenceList, ctx: &WidgetContext<'_>) -> FormElement {
    let mut element = FormElement::container().with_title(items.definition().label.clone());
    element.field_name = Some(items.field_name().to_string());
    element.field_parents = ctx.form_parents.to_vec();
    element
}

fn is_multiple(definition: &ReferenceFieldDefinition) -> bool {
    definition.cardinality != Cardinality::Limited(1)
}

// ============================================================================
// Base widgets
// ============================================================================

/// Plain autocomplete selector for one delta's target.
pub struct EntityAutocompleteWidget {
    settings: WidgetSettings,
}

impl EntityAutocompleteWidget {
    pub fn new(settings: WidgetSettings) -> Self {
        Self { settings }
    }
}

impl BaseWidget for EntityAutocompleteWidget {
    fn form_element(
        &self,
        items: &OverrideReferenceList,
        delta: usize,
        mut element: FormElement,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError> {
        let default = match (items.get(delta).and_then(|i| i.target_id), items.raw_entity(delta, ctx.loader)?) {
            (Some(id), Some(target)) => format!("{} ({id})", target.label().unwrap_or_default()),
            (Some(id), None) => id.to_string(),
            (None, _) => String::new(),
        };
        let mut target = FormElement::new(ElementKind::EntityAutocomplete)
            .with_default(FieldValue::Text(default))
            .with_attribute("size", self.settings.size.to_string())
            .with_attribute("match_operator", self.settings.match_operator.clone())
            .with_delta(delta);
        if !self.settings.placeholder.is_empty() {
            target
                .attributes
                .insert("placeholder".into(), self.settings.placeholder.clone());
        }
        element.insert(TARGET_ID_KEY, target);
        Ok(element)
    }
}

/// Media picker: a selection list of every loadable target plus an input
/// the picker dialog writes newly chosen ids into.
pub struct MediaLibraryWidget;

impl BaseWidget for MediaLibraryWidget {
    fn form_element(
        &self,
        items: &OverrideReferenceList,
        _delta: usize,
        mut element: FormElement,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError> {
        let mut selection = FormElement::container();
        for (delta, target) in items.referenced_entities(ctx.loader)? {
            let mut entry = FormElement::container().with_delta(delta).with_weight(delta as i32);
            entry.insert(
                TARGET_ID_KEY,
                FormElement::new(ElementKind::Hidden)
                    .with_default(FieldValue::Text(target.id().to_string()))
                    .with_delta(delta),
            );
            entry.insert(
                PREVIEW_KEY,
                FormElement::new(ElementKind::Markup)
                    .with_title(target.label().unwrap_or_default().to_string()),
            );
            selection.insert(delta.to_string(), entry);
        }
        element.insert(SELECTION_KEY, selection);
        element.insert(
            SELECTION_INPUT_KEY,
            FormElement::new(ElementKind::Hidden).with_default(FieldValue::Text(String::new())),
        );
        Ok(element)
    }
}

// ============================================================================
// Override widgets
// ============================================================================

/// Autocomplete widget with per-delta override subforms.
pub struct AutocompleteWithOverrideWidget {
    base: EntityAutocompleteWidget,
    settings: WidgetSettings,
}

impl AutocompleteWithOverrideWidget {
    pub const ID: &'static str = "entity_reference_autocomplete_with_override";

    /// `[field, widget, delta, control]` up to `[field, widget]`.
    pub const DEPTH: RebuildDepth = RebuildDepth {
        item_control: 2,
        field_control: 1,
    };

    pub fn new(settings: WidgetSettings) -> Self {
        Self {
            base: EntityAutocompleteWidget::new(settings.clone()),
            settings,
        }
    }
}

impl OverrideWidget for AutocompleteWithOverrideWidget {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &WidgetSettings {
        &self.settings
    }

    fn depth(&self) -> RebuildDepth {
        Self::DEPTH
    }

    fn items_path(&self) -> &'static [&'static str] {
        &[]
    }

    fn form(
        &self,
        items: &mut OverrideReferenceList,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError> {
        let key = WidgetStateKey::new(ctx.form_parents, items.field_name());
        restore_items(items, &key, ctx.form_state);
        if items.len() == 0 {
            items.set_items(vec![OverrideReferenceItem::default()]);
        }
        let open = ctx.form_state.session().open_subform(&key);
        let depth = self.depth();

        let mut widget = FormElement::container().transparent();
        widget.field_name = Some(items.field_name().to_string());
        widget.field_parents = ctx.form_parents.to_vec();

        for delta in 0..items.len() {
            let element = FormElement::container().with_delta(delta).with_weight(delta as i32);
            let mut element = self.base.form_element(items, delta, element, ctx)?;

            let subform_ctx = SubformContext {
                loader: ctx.loader,
                registry: ctx.registry,
                settings: &self.settings,
                open: open == Some(delta),
                replace_levels: depth.item_control,
            };
            element.absorb(build_overridable_subform(items, delta, &subform_ctx)?);

            let mut target_weight = 0;
            if let Some(target) = element.child_mut(TARGET_ID_KEY) {
                target.ajax = Some(AjaxSettings::new(
                    WidgetOperation::ChangeTarget,
                    &[AjaxEvent::AutocompleteClose, AjaxEvent::Change],
                    depth.item_control,
                ));
                target_weight = target.weight;
            }
            if let Some(edit) = element.child_mut(EDIT_KEY) {
                edit.weight = target_weight;
            }

            if is_multiple(items.definition()) {
                element.insert(
                    REMOVE_KEY,
                    FormElement::new(ElementKind::Button)
                        .with_title("Remove")
                        .with_ajax(AjaxSettings::new(
                            WidgetOperation::RemoveItem,
                            &[AjaxEvent::Click],
                            depth.item_control,
                        ))
                        .with_delta(delta)
                        .with_weight(100),
                );
            }
            widget.insert(delta.to_string(), element);
        }

        if items.definition().cardinality.allows(items.len() + 1) {
            widget.insert(
                ADD_MORE_KEY,
                FormElement::new(ElementKind::Submit)
                    .with_title("Add another item")
                    .with_ajax(AjaxSettings::new(
                        WidgetOperation::AddItem,
                        &[AjaxEvent::Click],
                        depth.field_control,
                    ))
                    .with_weight(1000),
            );
        }

        let mut field = field_container(items, ctx);
        field.insert(WIDGET_KEY, widget);
        Ok(field)
    }
}

/// Media library widget with override subforms on each selected item.
pub struct MediaLibraryWithOverrideWidget {
    base: MediaLibraryWidget,
    settings: WidgetSettings,
}

impl MediaLibraryWithOverrideWidget {
    pub const ID: &'static str = "media_library_with_override_widget";

    /// `[field, widget, selection, delta, control]` up to `[field, widget]`.
    pub const DEPTH: RebuildDepth = RebuildDepth {
        item_control: 3,
        field_control: 1,
    };

    pub fn new(settings: WidgetSettings) -> Self {
        Self {
            base: MediaLibraryWidget,
            settings,
        }
    }
}

impl OverrideWidget for MediaLibraryWithOverrideWidget {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &WidgetSettings {
        &self.settings
    }

    fn depth(&self) -> RebuildDepth {
        Self::DEPTH
    }

    fn items_path(&self) -> &'static [&'static str] {
        &[SELECTION_KEY]
    }

    fn form(
        &self,
        items: &mut OverrideReferenceList,
        ctx: &WidgetContext<'_>,
    ) -> Result<FormElement, EngineError> {
        let key = WidgetStateKey::new(ctx.form_parents, items.field_name());
        restore_items(items, &key, ctx.form_state);
        let open = ctx.form_state.session().open_subform(&key);
        let depth = self.depth();

        let mut widget = FormElement::container().transparent();
        widget.field_name = Some(items.field_name().to_string());
        widget.field_parents = ctx.form_parents.to_vec();
        let mut widget = self.base.form_element(items, 0, widget, ctx)?;

        // Only deltas whose target loaded have a selection entry.
        let present: Vec<usize> = items
            .referenced_entities(ctx.loader)?
            .into_iter()
            .map(|(delta, _)| delta)
            .collect();
        for delta in present {
            let subform_ctx = SubformContext {
                loader: ctx.loader,
                registry: ctx.registry,
                settings: &self.settings,
                open: open == Some(delta),
                replace_levels: depth.item_control,
            };
            let mut overrides = build_overridable_subform(items, delta, &subform_ctx)?;
            if let Some(edit) = overrides.child_mut(EDIT_KEY) {
                edit.attributes
                    .insert("class".into(), "media-library-item__edit".into());
            }
            overrides.insert(
                REMOVE_BUTTON_KEY,
                FormElement::new(ElementKind::Button)
                    .with_title("Remove")
                    .with_ajax(AjaxSettings::new(
                        WidgetOperation::RemoveItem,
                        &[AjaxEvent::Click],
                        depth.item_control,
                    ))
                    .with_delta(delta),
            );
            if let Some(entry) = widget
                .child_mut(SELECTION_KEY)
                .and_then(|selection| selection.child_mut(&delta.to_string()))
            {
                entry.absorb(overrides);
            }
        }

        if items.definition().cardinality.allows(items.len() + 1) {
            widget.insert(
                UPDATE_WIDGET_KEY,
                FormElement::new(ElementKind::Submit)
                    .with_title("Update widget")
                    .with_ajax(AjaxSettings::new(
                        WidgetOperation::UpdateSelection,
                        &[AjaxEvent::Click],
                        depth.field_control,
                    )),
            );
        }

        let mut field = field_container(items, ctx);
        field.insert(WIDGET_KEY, widget);
        Ok(field)
    }
}

// ============================================================================
// Session state handling
// ============================================================================

/// Fold one field's raw input into its committed session values.
///
/// The raw input decides which deltas exist; each takes its committed
/// values as a base. The add-more key is not a delta. Every entry keeps the
/// delta it was submitted under, in input order; a delta whose target
/// changed from the committed one loses its overrides.
pub fn reconcile_delta_values(
    raw: Option<&FieldValue>,
    committed: &[DeltaValues],
) -> Vec<(usize, DeltaValues)> {
    let Some(raw) = raw.filter(|r| r.is_structured()) else {
        return committed.iter().cloned().enumerate().collect();
    };
    let mut deltas: Vec<(usize, &FieldValue)> = raw
        .entries()
        .into_iter()
        .filter(|(key, _)| key != ADD_MORE_KEY)
        .filter_map(|(key, value)| key.parse::<usize>().ok().map(|delta| (delta, value)))
        .collect();
    deltas.sort_by_key(|(delta, _)| *delta);
    deltas
        .into_iter()
        .map(|(delta, value)| {
            let previous = committed.get(delta);
            let mut values = DeltaValues::from_input(value, previous);
            if previous.is_some_and(|p| is_retargeted(p, &values)) {
                values.overwritten_property_map = EMPTY_OVERRIDE_MAP.to_string();
            }
            (delta, values)
        })
        .collect()
}

fn is_retargeted(previous: &DeltaValues, current: &DeltaValues) -> bool {
    previous.target().ok().flatten() != current.target().ok().flatten()
}

/// Position of submitted `delta` among reconciled values.
fn position_of(reconciled: &[(usize, DeltaValues)], delta: usize) -> Option<usize> {
    reconciled.iter().position(|(submitted, _)| *submitted == delta)
}

/// Drives one widget through a request.
pub struct Orchestrator<'a> {
    pub widget: &'a dyn OverrideWidget,
    pub definition: &'a ReferenceFieldDefinition,
    pub key: WidgetStateKey,
    pub loader: &'a dyn EntityLoader<Error = StorageError>,
    pub registry: &'a EntityTypeRegistry,
    /// Language the host entity is edited in.
    pub langcode: &'a str,
}

impl Orchestrator<'_> {
    fn raw_input<'s>(&self, form_state: &'s FormState) -> Option<&'s FieldValue> {
        let mut path = self.key.input_path();
        path.extend(self.widget.items_path().iter().map(|s| s.to_string()));
        form_state.user_input().get_path(&path)
    }

    /// Session values as of the previous request.
    fn committed(&self, form_state: &FormState) -> Vec<DeltaValues> {
        form_state
            .session()
            .get_delta_values(&self.key)
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    /// Apply an ajax control's effect to the session before the rebuild.
    ///
    /// `delta` is the delta the control was rendered for. The session is
    /// left renumbered from zero.
    pub fn handle_trigger(
        &self,
        operation: WidgetOperation,
        delta: Option<usize>,
        form_state: &mut FormState,
    ) -> Result<(), EngineError> {
        form_state
            .session_mut()
            .set_phase(&self.key, WidgetPhase::PartiallyRebuilding);

        let committed = self.committed(form_state);
        let reconciled = reconcile_delta_values(self.raw_input(form_state), &committed);
        let index = delta.and_then(|d| position_of(&reconciled, d));
        // A subform whose delta was dropped or retargeted is closed.
        let mut open = form_state
            .session()
            .open_subform(&self.key)
            .and_then(|o| position_of(&reconciled, o))
            .filter(|&i| {
                let (submitted, current) = &reconciled[i];
                committed
                    .get(*submitted)
                    .is_none_or(|previous| !is_retargeted(previous, current))
            });
        let submitted: Vec<usize> = reconciled.iter().map(|(d, _)| *d).collect();
        let mut values: Vec<DeltaValues> = reconciled.into_iter().map(|(_, v)| v).collect();

        tracing::debug!(
            field = %self.key.field_name,
            ?operation,
            ?delta,
            ?index,
            deltas = values.len(),
            "partial rebuild"
        );

        match operation {
            // The map of a retargeted delta was already reset above.
            WidgetOperation::ChangeTarget => {}
            WidgetOperation::OpenSubform => {
                open = index;
            }
            WidgetOperation::ConfirmSubform => {
                if let Some(i) = index {
                    let confirmed =
                        self.confirm_subform(submitted[i], i, &mut values[i], form_state)?;
                    open = if confirmed { None } else { Some(i) };
                }
            }
            WidgetOperation::AddItem => {
                if self.definition.cardinality.allows(values.len() + 1) {
                    values.push(DeltaValues::default());
                } else {
                    self.cardinality_error(form_state);
                }
            }
            WidgetOperation::RemoveItem => {
                if let Some(i) = index {
                    values.remove(i);
                    open = match open {
                        Some(o) if o == i => None,
                        Some(o) if o > i => Some(o - 1),
                        other => other,
                    };
                }
            }
            WidgetOperation::UpdateSelection => {
                self.append_selection(&mut values, form_state);
            }
        }

        let session = form_state.session_mut();
        session.set_delta_values(&self.key, values);
        session.state_mut(&self.key).open_subform = open;
        Ok(())
    }

    /// Validate the subform submitted under `submitted` and store its
    /// overrides in `value`, which is rebuilt as delta `index`. Returns false
    /// when the subform has errors and must stay open.
    fn confirm_subform(
        &self,
        submitted: usize,
        index: usize,
        value: &mut DeltaValues,
        form_state: &mut FormState,
    ) -> Result<bool, EngineError> {
        let Ok(Some(target_id)) = value.target() else {
            return Ok(true);
        };
        let Some(target) = self
            .loader
            .load_entity(&self.definition.target_type, target_id)?
        else {
            return Ok(true);
        };
        let bundle = self.registry.require_bundle(target.entity_type(), target.bundle())?;
        let fields = self.widget.settings().overridable(bundle);

        let delta_path = self.key.delta(submitted).input_path(self.widget.items_path());
        let mut subform_path = delta_path.clone();
        subform_path.push(SUBFORM_KEY.to_string());
        let input = form_state.user_input().get_path(&subform_path).cloned();

        match extract_overrides(input.as_ref(), &target, self.langcode, &fields) {
            Ok(map) => {
                let encoded = map.encode();
                tracing::debug!(
                    field = %self.key.field_name,
                    delta = index,
                    overrides = map.len(),
                    "subform confirmed"
                );
                let mut carrier = delta_path;
                carrier.push(OVERRIDE_MAP_KEY.to_string());
                form_state.set_user_input_value(&carrier, FieldValue::Text(encoded.clone()));
                value.overwritten_property_map = encoded;
                Ok(true)
            }
            Err(violations) => {
                // Errors belong to the rebuilt form, which is renumbered.
                let mut error_path = self.key.delta(index).input_path(self.widget.items_path());
                error_path.push(SUBFORM_KEY.to_string());
                for violation in violations {
                    let mut parents = error_path.clone();
                    parents.push(violation.field_name);
                    form_state.set_error(parents, violation.message);
                }
                Ok(false)
            }
        }
    }

/// Append the ids the picker wrote into the selection input.
    fn append_selection(&self, values: &mut Vec<DeltaValues>, form_state: &mut FormState) {
        let mut path = self.key.input_path();
        path.push(SELECTION_INPUT_KEY.to_string());
        let selected = form_state
            .user_input()
            .get_path(&path)
            .and_then(FieldValue::as_text)
            .unwrap_or_default()
            .to_string();

        for raw in selected.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.definition.cardinality.allows(values.len() + 1) {
                self.cardinality_error(form_state);
                break;
            }
            values.push(DeltaValues {
                target_id: raw.to_string(),
                overwritten_property_map: EMPTY_OVERRIDE_MAP.to_string(),
            });
        }
        form_state.set_user_input_value(&path, FieldValue::Text(String::new()));
    }

    fn cardinality_error(&self, form_state: &mut FormState) {
        if let Cardinality::Limited(max) = self.definition.cardinality {
            form_state.set_error(
                self.key.input_path(),
                format!("{} allows at most {max} values.", self.definition.label),
            );
        }
    }

    /// Collect the final items on submit. A subform still open in the input
    /// is confirmed first. Unparseable targets are reported on their
    /// control; empty slots are dropped.
    pub fn extract_form_values(
        &self,
        form_state: &mut FormState,
    ) -> Result<Vec<OverrideReferenceItem>, EngineError> {
        let committed = self.committed(form_state);
        let reconciled = reconcile_delta_values(self.raw_input(form_state), &committed);
        let mut values = Vec::with_capacity(reconciled.len());
        let mut open = None;
        for (index, (submitted, mut value)) in reconciled.into_iter().enumerate() {
            // A subform filled in for a target that has since been replaced
            // no longer applies.
            let retargeted = committed
                .get(submitted)
                .is_some_and(|previous| is_retargeted(previous, &value));
            let mut subform_path = self.key.delta(submitted).input_path(self.widget.items_path());
            subform_path.push(SUBFORM_KEY.to_string());
            if !retargeted
                && form_state.user_input().get_path(&subform_path).is_some()
                && !self.confirm_subform(submitted, index, &mut value, form_state)?
            {
                open = Some(index);
            }
            values.push(value);
        }

        let mut items = Vec::new();
        for (index, value) in values.iter().enumerate() {
            match value.to_item() {
                Ok(item) if item.is_empty() => {}
                Ok(item) => items.push(item),
                Err(_) => {
                    let mut parents = self.key.delta(index).input_path(self.widget.items_path());
                    parents.push(TARGET_ID_KEY.to_string());
                    form_state.set_error(
                        parents,
                        format!("There are no entities matching \"{}\".", value.target_id),
                    );
                }
            }
        }
        if !self.definition.cardinality.allows(items.len()) {
            self.cardinality_error(form_state);
        }

        let session = form_state.session_mut();
        session.set_delta_values(&self.key, values);
        session.state_mut(&self.key).open_subform = open;
        session.set_phase(&self.key, WidgetPhase::Extracted);
        tracing::debug!(field = %self.key.field_name, items = items.len(), "extracted field values");
        Ok(items)
    }
}

/// Array parents of the fragment a control's partial rebuild replaces: the
/// control's path with `levels` trimmed, widened to the nearest element that
/// belongs to a field.
pub fn replace_region_path(
    form: &FormElement,
    control_path: &[String],
    levels: usize,
) -> Option<Vec<String>> {
    let mut len = control_path.len().checked_sub(levels)?;
    loop {
        let candidate = &control_path[..len];
        if form.get_path(candidate)?.field_name.is_some() {
            return Some(candidate.to_vec());
        }
        len = len.checked_sub(1)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use entity_override_core::EntityId;

    fn delta(target: &str, map: &str) -> DeltaValues {
        DeltaValues {
            target_id: target.into(),
            overwritten_property_map: map.into(),
        }
    }

    #[test]
    fn raw_input_decides_deltas_and_wins() {
        let (a, c) = (EntityId::new().to_string(), EntityId::new().to_string());
        let committed = vec![delta(&a, r#"{"x":1}"#), delta("b", "{}"), delta(&c, "{}")];
        let labelled = format!("A ({a})");
        let mut raw = FieldValue::Null;
        raw.set_path(&["0", TARGET_ID_KEY], labelled.as_str().into());
        raw.set_path(&["0", OVERRIDE_MAP_KEY], r#"{"x":2}"#.into());
        raw.set_path(&["2", TARGET_ID_KEY], c.as_str().into());
        raw.set_path(&["2", OVERRIDE_MAP_KEY], "{}".into());
        raw.set_path(&[ADD_MORE_KEY], "Add another item".into());

        let values = reconcile_delta_values(Some(&raw), &committed);
        assert_eq!(
            values,
            vec![(0, delta(&labelled, r#"{"x":2}"#)), (2, delta(&c, "{}"))]
        );
    }

    #[test]
    fn retyped_target_drops_its_overrides() {
        let (a, b) = (EntityId::new(), EntityId::new());
        let committed = vec![
            delta(&a.to_string(), r#"{"name":"X"}"#),
            delta(&b.to_string(), r#"{"name":"Y"}"#),
        ];
        let mut raw = FieldValue::Null;
        raw.set_path(&["0", TARGET_ID_KEY], format!("B ({b})").as_str().into());
        raw.set_path(&["0", OVERRIDE_MAP_KEY], r#"{"name":"X"}"#.into());
        raw.set_path(&["1", TARGET_ID_KEY], b.to_string().as_str().into());
        raw.set_path(&["1", OVERRIDE_MAP_KEY], r#"{"name":"Y"}"#.into());

        let values = reconcile_delta_values(Some(&raw), &committed);
        assert_eq!(values[0].1.overwritten_property_map, "{}");
        assert_eq!(values[1].1.overwritten_property_map, r#"{"name":"Y"}"#);
    }

    #[test]
    fn rows_without_map_get_empty_token() {
        let mut raw = FieldValue::Null;
        raw.set_path(&["0", TARGET_ID_KEY], "new".into());
        let values = reconcile_delta_values(Some(&raw), &[]);
        assert_eq!(values, vec![(0, delta("new", "{}"))]);
    }

    #[test]
    fn no_raw_input_keeps_committed() {
        let committed = vec![delta("a", "{}"), delta("b", "{}")];
        assert_eq!(
            reconcile_delta_values(None, &committed),
            vec![(0, delta("a", "{}")), (1, delta("b", "{}"))]
        );
    }

    #[test]
    fn submitted_deltas_map_to_positions() {
        let mut raw = FieldValue::Null;
        raw.set_path(&["1", TARGET_ID_KEY], "a".into());
        raw.set_path(&["2", TARGET_ID_KEY], "b".into());
        let values = reconcile_delta_values(Some(&raw), &[]);
        assert_eq!(position_of(&values, 0), None);
        assert_eq!(position_of(&values, 1), Some(0));
        assert_eq!(position_of(&values, 2), Some(1));
    }

    #[test]
    fn region_widens_to_field_element() {
        let mut item = FormElement::container();
        item.insert(TARGET_ID_KEY, FormElement::new(ElementKind::EntityAutocomplete));
        let mut widget = FormElement::container().transparent();
        widget.field_name = Some("field_ref".into());
        widget.insert("0", item);
        let mut field = FormElement::container();
        field.field_name = Some("field_ref".into());
        field.insert(WIDGET_KEY, widget);
        let mut form = FormElement::container();
        form.insert("field_ref", field);

        let control: Vec<String> = ["field_ref", WIDGET_KEY, "0", TARGET_ID_KEY]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            replace_region_path(&form, &control, 2),
            Some(vec!["field_ref".to_string(), WIDGET_KEY.to_string()])
        );
        assert_eq!(
            replace_region_path(&form, &control, 1),
            Some(vec!["field_ref".to_string(), WIDGET_KEY.to_string()])
        );
        assert_eq!(replace_region_path(&form, &control, 9), None);
    }
}
