use entity_override_core::{EntityId, FieldValue};
use entity_override_engine::{Engine, EngineError, FormElement, FormResponse, FormState};

/// What a browser submits for `form` as currently rendered: the value of
/// every accessible input at its input path.
pub fn rendered_input(form: &FormElement) -> FieldValue {
    let mut input = FieldValue::Null;
    collect_input(form, &mut input);
    input
}

fn collect_input(element: &FormElement, input: &mut FieldValue) {
    if !element.access {
        return;
    }
    if element.kind.is_input() {
        if let Some(value) = &element.default_value {
            input.set_path(&element.parents, value.clone());
        }
    }
    for child in element.children.values() {
        collect_input(child, input);
    }
}

/// One open edit form, kept in step with the server the way a browser
/// would: ajax responses patch the rendered tree in place.
pub struct FormSession {
    pub host_id: EntityId,
    pub state: FormState,
    pub form: FormElement,
}

impl FormSession {
    pub fn open(engine: &Engine, host_id: EntityId) -> Result<Self, EngineError> {
        let mut state = FormState::new();
        let form = engine.build_form(host_id, &mut state)?;
        Ok(Self {
            host_id,
            state,
            form,
        })
    }

    /// Submit the rendered form through `control`, after `edit` has
    /// changed whatever the user typed.
    pub fn press<S: AsRef<str>>(
        &mut self,
        engine: &mut Engine,
        control: &[S],
        edit: impl FnOnce(&mut FieldValue),
    ) -> Result<FormResponse, EngineError> {
        let mut input = rendered_input(&self.form);
        edit(&mut input);
        let control: Vec<String> = control.iter().map(|s| s.as_ref().to_string()).collect();
        self.state.begin_request(input, Some(control));

        let response = engine.submit_form(self.host_id, &mut self.state)?;
        match &response {
            FormResponse::Ajax(ajax) => {
                if let Some(element) = ajax.replaced_element() {
                    if let Some(slot) = self.form.get_path_mut(&element.array_parents) {
                        *slot = element.clone();
                    }
                }
            }
            FormResponse::Invalid(form) => self.form = form.clone(),
            FormResponse::Saved(_) => {}
        }
        Ok(response)
    }

    /// Rendered element at `array_parents`.
    pub fn element<S: AsRef<str>>(&self, array_parents: &[S]) -> Option<&FormElement> {
        self.form.get_path(array_parents)
    }
}
