use std::collections::BTreeMap;

use entity_override_core::{
    CoreError, EntityId, FieldValue, OverrideReferenceItem, EMPTY_OVERRIDE_MAP,
};

/// Input key of the add-more control, which never names a delta.
pub const ADD_MORE_KEY: &str = "add_more";
pub const TARGET_ID_KEY: &str = "target_id";
pub const OVERRIDE_MAP_KEY: &str = "overwritten_property_map";

/// Identifies one widget's state within a form session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WidgetStateKey {
    pub form_parents: Vec<String>,
    pub field_name: String,
}

impl WidgetStateKey {
    pub fn new(form_parents: &[String], field_name: &str) -> Self {
        Self {
            form_parents: form_parents.to_vec(),
            field_name: field_name.to_string(),
        }
    }

    /// Input path of the field: form parents followed by the field name.
    pub fn input_path(&self) -> Vec<String> {
        let mut path = self.form_parents.clone();
        path.push(self.field_name.clone());
        path
    }

    pub fn delta(&self, delta: usize) -> DeltaPath {
        DeltaPath {
            key: self.clone(),
            delta,
        }
    }
}

/// One delta of one widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPath {
    pub key: WidgetStateKey,
    pub delta: usize,
}

impl DeltaPath {
    /// Input path of the delta, with `items_path` between field and delta
    /// for widgets that nest their items.
    pub fn input_path(&self, items_path: &[&str]) -> Vec<String> {
        let mut path = self.key.input_path();
        path.extend(items_path.iter().map(|s| s.to_string()));
        path.push(self.delta.to_string());
        path
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WidgetPhase {
    /// Loaded from storage, nothing edited in this session yet.
    #[default]
    Initial,
    Built,
    PartiallyRebuilding,
    Extracted,
}

/// Raw, unvalidated values of one delta as last seen in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaValues {
    /// Text of the target control: a bare id or `Label (id)`.
    pub target_id: String,
    pub overwritten_property_map: String,
}

impl Default for DeltaValues {
    fn default() -> Self {
        Self {
            target_id: String::new(),
            overwritten_property_map: EMPTY_OVERRIDE_MAP.to_string(),
        }
    }
}

impl DeltaValues {
    pub fn from_item(item: &OverrideReferenceItem) -> Self {
        Self {
            target_id: item.target_id.map(|id| id.to_string()).unwrap_or_default(),
            overwritten_property_map: item.overwritten_property_map.clone(),
        }
    }

    /// Rebuild from one delta's raw input. A missing map is the empty token,
    /// not whatever was committed before.
    pub fn from_input(raw: &FieldValue, committed: Option<&DeltaValues>) -> Self {
        let mut values = committed.cloned().unwrap_or_default();
        if let Some(target) = raw.get(TARGET_ID_KEY).and_then(FieldValue::as_text) {
            values.target_id = target.to_string();
        }
        values.overwritten_property_map = raw
            .get(OVERRIDE_MAP_KEY)
            .and_then(FieldValue::as_text)
            .unwrap_or(EMPTY_OVERRIDE_MAP)
            .to_string();
        values
    }

    pub fn target(&self) -> Result<Option<EntityId>, CoreError> {
        parse_target_input(&self.target_id)
    }

    pub fn to_item(&self) -> Result<OverrideReferenceItem, CoreError> {
        Ok(OverrideReferenceItem {
            target_id: self.target()?,
            overwritten_property_map: self.overwritten_property_map.clone(),
        })
    }
}

/// Parse autocomplete text: empty, a bare id, or `Label (id)`.
pub fn parse_target_input(input: &str) -> Result<Option<EntityId>, CoreError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let id = match (input.rfind('('), input.strip_suffix(')')) {
        (Some(open), Some(without_close)) => &without_close[open + 1..],
        _ => input,
    };
    id.parse().map(Some)
}

#[derive(Debug, Clone, Default)]
pub struct WidgetState {
    /// Latest raw values, indexed by delta.
    pub items: Option<Vec<DeltaValues>>,
    /// Delta whose subform is open.
    pub open_subform: Option<usize>,
    pub phase: WidgetPhase,
}

/// Per-form-session memory of every widget, carried across rebuilds.
#[derive(Debug, Clone, Default)]
pub struct WidgetSession {
    states: BTreeMap<WidgetStateKey, WidgetState>,
}

impl WidgetSession {
    pub fn get(&self, key: &WidgetStateKey) -> Option<&WidgetState> {
        self.states.get(key)
    }

    pub fn state_mut(&mut self, key: &WidgetStateKey) -> &mut WidgetState {
        self.states.entry(key.clone()).or_default()
    }

    pub fn get_delta_values(&self, key: &WidgetStateKey) -> Option<&[DeltaValues]> {
        self.states.get(key).and_then(|s| s.items.as_deref())
    }

    /// Replace every delta at once; deltas not in `values` are gone.
    pub fn set_delta_values(&mut self, key: &WidgetStateKey, values: Vec<DeltaValues>) {
        self.state_mut(key).items = Some(values);
    }

    pub fn phase(&self, key: &WidgetStateKey) -> WidgetPhase {
        self.states.get(key).map(|s| s.phase).unwrap_or_default()
    }

    pub fn set_phase(&mut self, key: &WidgetStateKey, phase: WidgetPhase) {
        self.state_mut(key).phase = phase;
    }

    pub fn open_subform(&self, key: &WidgetStateKey) -> Option<usize> {
        self.states.get(key).and_then(|s| s.open_subform)
    }
}

/// State of one form across the requests of an editing session.
#[derive(Debug, Clone, Default)]
pub struct FormState {
    user_input: FieldValue,
    triggering_element: Option<Vec<String>>,
    errors: BTreeMap<Vec<String>, String>,
    session: WidgetSession,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request: fresh input and trigger, session kept.
    pub fn begin_request(&mut self, user_input: FieldValue, triggering_element: Option<Vec<String>>) {
        self.user_input = user_input;
        self.triggering_element = triggering_element;
        self.errors.clear();
    }

    pub fn user_input(&self) -> &FieldValue {
        &self.user_input
    }

    pub fn set_user_input_value<S: AsRef<str>>(&mut self, path: &[S], value: FieldValue) {
        self.user_input.set_path(path, value);
    }

    /// Array parents of the control that submitted this request.
    pub fn triggering_element(&self) -> Option<&[String]> {
        self.triggering_element.as_deref()
    }

    pub fn set_error(&mut self, parents: Vec<String>, message: impl Into<String>) {
        self.errors.entry(parents).or_insert_with(|| message.into());
    }

    pub fn errors(&self) -> &BTreeMap<Vec<String>, String> {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn session(&self) -> &WidgetSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut WidgetSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_autocomplete_text() {
        let id = EntityId::new();
        assert_eq!(parse_target_input("").unwrap(), None);
        assert_eq!(parse_target_input(&id.to_string()).unwrap(), Some(id));
        assert_eq!(
            parse_target_input(&format!("Original name ({id})")).unwrap(),
            Some(id)
        );
        assert!(parse_target_input("Original name").is_err());
    }

    #[test]
    fn raw_input_without_map_gets_empty_token() {
        let committed = DeltaValues {
            target_id: "a".into(),
            overwritten_property_map: r#"{"name":"x"}"#.into(),
        };
        let raw = FieldValue::map([(TARGET_ID_KEY, "b")]);
        let values = DeltaValues::from_input(&raw, Some(&committed));
        assert_eq!(values.target_id, "b");
        assert_eq!(values.overwritten_property_map, "{}");
    }

    #[test]
    fn set_delta_values_replaces_wholesale() {
        let key = WidgetStateKey::new(&[], "field_reference_override");
        let mut session = WidgetSession::default();
        assert_eq!(session.phase(&key), WidgetPhase::Initial);
        session.set_delta_values(&key, vec![DeltaValues::default(); 3]);
        session.set_delta_values(&key, vec![DeltaValues::default()]);
        assert_eq!(session.get_delta_values(&key).map(<[_]>::len), Some(1));
    }

    #[test]
    fn delta_path_input_path() {
        let key = WidgetStateKey::new(&["inline".to_string()], "field_media");
        assert_eq!(
            key.delta(2).input_path(&["selection"]),
            vec!["inline", "field_media", "selection", "2"]
        );
    }
}
