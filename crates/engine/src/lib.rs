pub mod ajax;
pub mod config;
pub mod error;
pub mod form;
pub mod form_state;
pub mod registry;
pub mod subform;
pub mod widget;

pub use ajax::{AjaxCommand, AjaxResponse};
pub use config::WidgetSettings;
pub use error::EngineError;
pub use form::{AjaxEvent, AjaxSettings, ElementKind, FormElement, WidgetOperation};
pub use form_state::{DeltaValues, FormState, WidgetPhase, WidgetSession, WidgetStateKey};
pub use registry::{BaseFieldDefinition, BundleDefinition, EntityTypeRegistry, FieldKind, Violation};
pub use widget::{
    AutocompleteWithOverrideWidget, MediaLibraryWithOverrideWidget, OverrideWidget, RebuildDepth,
};

use std::collections::BTreeMap;

use entity_override_core::{
    Cardinality, ContentEntity, EntityId, MergedEntityView, OverrideReferenceItem,
    OverrideReferenceList, ReferenceFieldDefinition,
};
use entity_override_storage::{SqliteStorage, Storage};

use crate::form_state::{ADD_MORE_KEY, TARGET_ID_KEY};
use crate::widget::{replace_region_path, Orchestrator, WidgetContext};

pub const ACTIONS_KEY: &str = "actions";
pub const SUBMIT_KEY: &str = "submit";

/// Outcome of one form request.
#[derive(Debug)]
pub enum FormResponse {
    /// An ajax control was handled; only a fragment is re-rendered.
    Ajax(AjaxResponse),
    /// The form was submitted and every reference field stored.
    Saved(EntityId),
    /// The form was submitted with errors; the rebuilt form carries them.
    Invalid(FormElement),
}

/// One rendered value of a reference field.
#[derive(Debug, Clone)]
pub struct RenderedReference {
    pub delta: usize,
    pub entity: MergedEntityView,
}

type WidgetKey = (String, String, String);

pub struct Engine {
    storage: SqliteStorage,
    registry: EntityTypeRegistry,
    widgets: BTreeMap<WidgetKey, Box<dyn OverrideWidget>>,
    default_widget: AutocompleteWithOverrideWidget,
}

impl Engine {
    pub fn new(storage: SqliteStorage, registry: EntityTypeRegistry) -> Self {
        Self {
            storage,
            registry,
            widgets: BTreeMap::new(),
            default_widget: AutocompleteWithOverrideWidget::new(WidgetSettings::default()),
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn registry(&self) -> &EntityTypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityTypeRegistry {
        &mut self.registry
    }

    /// Use `widget` for one reference field instead of the default
    /// autocomplete widget.
    pub fn configure_widget(
        &mut self,
        host_entity_type: &str,
        host_bundle: &str,
        field_name: &str,
        widget: Box<dyn OverrideWidget>,
    ) -> Result<(), EngineError> {
        if self
            .registry
            .reference_field(host_entity_type, host_bundle, field_name)
            .is_none()
        {
            return Err(EngineError::UnknownField(field_name.to_string()));
        }
        tracing::debug!(field = field_name, widget = widget.id(), "widget configured");
        self.widgets.insert(
            (
                host_entity_type.to_string(),
                host_bundle.to_string(),
                field_name.to_string(),
            ),
            widget,
        );
        Ok(())
    }

    fn widget_for(&self, definition: &ReferenceFieldDefinition) -> &dyn OverrideWidget {
        let key = (
            definition.host_entity_type.clone(),
            definition.host_bundle.clone(),
            definition.field_name.clone(),
        );
        match self.widgets.get(&key) {
            Some(widget) => widget.as_ref(),
            None => &self.default_widget,
        }
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Validate and store an entity.
    pub fn save_entity(&mut self, entity: &ContentEntity) -> Result<(), EngineError> {
        let violations = self.registry.validate(entity)?;
        if !violations.is_empty() {
            return Err(EngineError::Validation(violations));
        }
        self.storage.save_entity(entity)?;
        tracing::debug!(entity = %entity.id(), entity_type = entity.entity_type(), "entity saved");
        Ok(())
    }

    pub fn load_entity(&self, entity_id: EntityId) -> Result<Option<ContentEntity>, EngineError> {
        Ok(self.storage.get_entity(entity_id)?)
    }

    fn require_entity(&self, entity_id: EntityId) -> Result<ContentEntity, EngineError> {
        self.load_entity(entity_id)?
            .ok_or_else(|| EngineError::EntityNotFound(entity_id.to_string()))
    }

    /// Delete an entity. References it hosts go with it; references
    /// pointing at it stay and resolve to nothing.
    pub fn delete_entity(&mut self, entity_id: EntityId) -> Result<(), EngineError> {
        if !self.storage.delete_entity(entity_id)? {
            return Err(EngineError::EntityNotFound(entity_id.to_string()));
        }
        tracing::info!(entity = %entity_id, "entity deleted");
        Ok(())
    }

    // ========================================================================
    // Reference fields
    // ========================================================================

    fn definition_for(
        &self,
        host: &ContentEntity,
        field_name: &str,
    ) -> Result<&ReferenceFieldDefinition, EngineError> {
        self.registry
            .reference_field(host.entity_type(), host.bundle(), field_name)
            .ok_or_else(|| EngineError::UnknownField(field_name.to_string()))
    }

    /// The stored values of one reference field on one host.
    pub fn reference_list(
        &self,
        host_id: EntityId,
        field_name: &str,
    ) -> Result<OverrideReferenceList, EngineError> {
        let host = self.require_entity(host_id)?;
        let definition = self.definition_for(&host, field_name)?.clone();
        let items = self.storage.load_reference_items(host_id, field_name)?;
        Ok(OverrideReferenceList::new(definition, &host, items))
    }

    /// Replace the values of one reference field. Empty items are dropped.
    pub fn set_reference_items(
        &mut self,
        host_id: EntityId,
        field_name: &str,
        items: Vec<OverrideReferenceItem>,
    ) -> Result<(), EngineError> {
        let host = self.require_entity(host_id)?;
        let definition = self.definition_for(&host, field_name)?.clone();
        let mut list = OverrideReferenceList::new(definition, &host, items);
        list.filter_empty_items();
        if let Cardinality::Limited(max) = list.definition().cardinality {
            if !list.definition().cardinality.allows(list.len()) {
                return Err(EngineError::CardinalityExceeded {
                    field: field_name.to_string(),
                    max,
                });
            }
        }
        self.storage
            .save_reference_items(host_id, field_name, list.items())?;
        tracing::debug!(host = %host_id, field = field_name, items = list.len(), "reference items saved");
        Ok(())
    }

    /// The target of one delta with that delta's overrides applied.
    pub fn resolved_entity(
        &self,
        host_id: EntityId,
        field_name: &str,
        delta: usize,
    ) -> Result<Option<MergedEntityView>, EngineError> {
        let list = self.reference_list(host_id, field_name)?;
        Ok(list.resolved_entity(delta, &self.storage)?)
    }

    /// Every resolvable value of a reference field, ready for display.
    /// Deltas whose target no longer loads are skipped.
    pub fn view_reference_field(
        &self,
        host_id: EntityId,
        field_name: &str,
    ) -> Result<Vec<RenderedReference>, EngineError> {
        let list = self.reference_list(host_id, field_name)?;
        let mut rendered = Vec::new();
        for delta in 0..list.len() {
            if let Some(entity) = list.resolved_entity(delta, &self.storage)? {
                rendered.push(RenderedReference { delta, entity });
            }
        }
        Ok(rendered)
    }

    // ========================================================================
    // Forms
    // ========================================================================

    /// Build the edit form of a host entity's reference fields.
    ///
    /// The first build of a session seeds each widget's state from storage;
    /// later builds render whatever the session holds.
    pub fn build_form(
        &self,
        host_id: EntityId,
        form_state: &mut FormState,
    ) -> Result<FormElement, EngineError> {
        let host = self.require_entity(host_id)?;
        let form_parents: Vec<String> = Vec::new();
        let mut form = FormElement::container();

        for definition in self
            .registry
            .reference_fields(host.entity_type(), host.bundle())
        {
            let key = WidgetStateKey::new(&form_parents, &definition.field_name);
            let stored = self
                .storage
                .load_reference_items(host_id, &definition.field_name)?;
            if form_state.session().get_delta_values(&key).is_none() {
                let values = stored.iter().map(DeltaValues::from_item).collect();
                form_state.session_mut().set_delta_values(&key, values);
            }

            let mut items = OverrideReferenceList::new(definition.clone(), &host, stored);
            let ctx = WidgetContext {
                form_parents: &form_parents,
                form_state: &*form_state,
                loader: &self.storage,
                registry: &self.registry,
            };
            let element = self.widget_for(definition).form(&mut items, &ctx)?;
            form.insert(definition.field_name.clone(), element);

            let session = form_state.session_mut();
            if session.phase(&key) != WidgetPhase::Extracted {
                session.set_phase(&key, WidgetPhase::Built);
            }
        }

        let mut actions = FormElement::container().with_weight(100);
        actions.insert(
            SUBMIT_KEY,
            FormElement::new(ElementKind::Submit).with_title("Save"),
        );
        form.insert(ACTIONS_KEY, actions);

        form.assign_parents(Vec::new(), Vec::new());
        form.attach_errors(form_state.errors());
        Ok(form)
    }

    /// Process one request against the form: either an ajax control or the
    /// final submit, identified by the form state's triggering element.
    pub fn submit_form(
        &mut self,
        host_id: EntityId,
        form_state: &mut FormState,
    ) -> Result<FormResponse, EngineError> {
        let form = self.build_form(host_id, form_state)?;
        let trigger_path = form_state
            .triggering_element()
            .map(<[String]>::to_vec)
            .ok_or_else(|| EngineError::InvalidTrigger("no triggering element".into()))?;
        let trigger = form
            .get_path(&trigger_path)
            .ok_or_else(|| EngineError::InvalidTrigger(trigger_path.join("][")))?
            .clone();

        if let Some(ajax) = &trigger.ajax {
            let response = self.handle_ajax(host_id, &form, &trigger_path, &trigger, ajax, form_state)?;
            return Ok(FormResponse::Ajax(response));
        }
        if trigger_path == [ACTIONS_KEY, SUBMIT_KEY] {
            return self.submit_references(host_id, form_state);
        }
        Err(EngineError::InvalidTrigger(trigger_path.join("][")))
    }

    fn handle_ajax(
        &self,
        host_id: EntityId,
        form: &FormElement,
        trigger_path: &[String],
        trigger: &FormElement,
        ajax: &AjaxSettings,
        form_state: &mut FormState,
    ) -> Result<AjaxResponse, EngineError> {
        let host = self.require_entity(host_id)?;
        let region_path = replace_region_path(form, trigger_path, ajax.replace_levels)
            .ok_or_else(|| EngineError::InvalidTrigger(trigger_path.join("][")))?;
        let region = form
            .get_path(&region_path)
            .ok_or_else(|| EngineError::InvalidTrigger(region_path.join("][")))?;
        let field_name = region.field_name.clone().unwrap_or_default();
        let definition = self.definition_for(&host, &field_name)?;

        let orchestrator = Orchestrator {
            widget: self.widget_for(definition),
            definition,
            key: WidgetStateKey::new(&region.field_parents, &field_name),
            loader: &self.storage,
            registry: &self.registry,
            langcode: host.langcode(),
        };
        orchestrator.handle_trigger(ajax.operation, trigger.delta, form_state)?;

        let rebuilt = self.build_form(host_id, form_state)?;
        let element = rebuilt
            .get_path(&region_path)
            .cloned()
            .ok_or_else(|| EngineError::InvalidTrigger(region_path.join("][")))?;
        let selector = format!(
            "[{}=\"{}\"]",
            crate::form::SELECTOR_ATTRIBUTE,
            element.selector().unwrap_or_default()
        );

        let mut response = AjaxResponse::new();
        if form_state.has_errors() {
            response.add_command(AjaxCommand::Messages {
                selector: selector.clone(),
                messages: form_state.errors().values().cloned().collect(),
            });
        }
        response.add_command(AjaxCommand::Replace { selector, element });
        Ok(response)
    }

    fn submit_references(
        &mut self,
        host_id: EntityId,
        form_state: &mut FormState,
    ) -> Result<FormResponse, EngineError> {
        let host = self.require_entity(host_id)?;
        let form_parents: Vec<String> = Vec::new();

        let mut extracted = Vec::new();
        for definition in self
            .registry
            .reference_fields(host.entity_type(), host.bundle())
        {
            let orchestrator = Orchestrator {
                widget: self.widget_for(definition),
                definition,
                key: WidgetStateKey::new(&form_parents, &definition.field_name),
                loader: &self.storage,
                registry: &self.registry,
                langcode: host.langcode(),
            };
            let items = orchestrator.extract_form_values(form_state)?;
            extracted.push((definition.field_name.clone(), items));
        }

        if form_state.has_errors() {
            tracing::debug!(host = %host_id, errors = form_state.errors().len(), "form has errors");
            let form = self.build_form(host_id, form_state)?;
            return Ok(FormResponse::Invalid(form));
        }

        for (field_name, items) in extracted {
            self.storage.save_reference_items(host_id, &field_name, &items)?;
        }
        tracing::info!(host = %host_id, "reference fields saved");
        Ok(FormResponse::Saved(host_id))
    }
}

/// Array parents of a control inside an autocomplete override widget.
pub fn autocomplete_control_path(field_name: &str, delta: usize, control: &str) -> Vec<String> {
    vec![
        field_name.to_string(),
        widget::WIDGET_KEY.to_string(),
        delta.to_string(),
        control.to_string(),
    ]
}

/// Array parents of a control inside a media library override widget.
pub fn media_control_path(field_name: &str, delta: usize, control: &str) -> Vec<String> {
    vec![
        field_name.to_string(),
        widget::WIDGET_KEY.to_string(),
        widget::SELECTION_KEY.to_string(),
        delta.to_string(),
        control.to_string(),
    ]
}

/// Array parents of the autocomplete widget's add-more control.
pub fn add_more_path(field_name: &str) -> Vec<String> {
    vec![
        field_name.to_string(),
        widget::WIDGET_KEY.to_string(),
        ADD_MORE_KEY.to_string(),
    ]
}

/// Array parents of the target control of one autocomplete delta.
pub fn target_control_path(field_name: &str, delta: usize) -> Vec<String> {
    autocomplete_control_path(field_name, delta, TARGET_ID_KEY)
}
