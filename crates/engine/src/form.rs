use std::collections::BTreeMap;

use entity_override_core::FieldValue;

pub const SELECTOR_ATTRIBUTE: &str = "data-drupal-selector";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Container,
    Hidden,
    Textfield,
    Textarea,
    Number,
    Checkbox,
    EntityAutocomplete,
    Button,
    Submit,
    Markup,
}

impl ElementKind {
    /// Kinds that carry a submitted value.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::Hidden
                | Self::Textfield
                | Self::Textarea
                | Self::Number
                | Self::Checkbox
                | Self::EntityAutocomplete
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AjaxEvent {
    Change,
    AutocompleteClose,
    Click,
}

/// What a widget does when one of its ajax controls fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetOperation {
    /// The target id of a delta changed.
    ChangeTarget,
    OpenSubform,
    ConfirmSubform,
    AddItem,
    RemoveItem,
    /// New targets were picked into the selection input.
    UpdateSelection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AjaxSettings {
    pub operation: WidgetOperation,
    pub events: Vec<AjaxEvent>,
    /// Levels trimmed off the control's array parents to reach the fragment
    /// that is replaced.
    pub replace_levels: usize,
}

impl AjaxSettings {
    pub fn new(operation: WidgetOperation, events: &[AjaxEvent], replace_levels: usize) -> Self {
        Self {
            operation,
            events: events.to_vec(),
            replace_levels,
        }
    }
}

/// A node of a form tree.
///
/// `parents` locate the element's value in submitted input; `array_parents`
/// locate the element in the tree. They differ where a wrapper is
/// `transparent` and contributes no input key.
#[derive(Debug, Clone, PartialEq)]
pub struct FormElement {
    pub kind: ElementKind,
    pub title: Option<String>,
    pub default_value: Option<FieldValue>,
    pub required: bool,
    pub access: bool,
    pub weight: i32,
    pub transparent: bool,
    pub parents: Vec<String>,
    pub array_parents: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub ajax: Option<AjaxSettings>,
    pub errors: Vec<String>,
    pub field_name: Option<String>,
    pub field_parents: Vec<String>,
    pub delta: Option<usize>,
    pub children: BTreeMap<String, FormElement>,
}

impl FormElement {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            title: None,
            default_value: None,
            required: false,
            access: true,
            weight: 0,
            transparent: false,
            parents: Vec::new(),
            array_parents: Vec::new(),
            attributes: BTreeMap::new(),
            ajax: None,
            errors: Vec::new(),
            field_name: None,
            field_parents: Vec::new(),
            delta: None,
            children: BTreeMap::new(),
        }
    }

    pub fn container() -> Self {
        Self::new(ElementKind::Container)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_ajax(mut self, ajax: AjaxSettings) -> Self {
        self.ajax = Some(ajax);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn with_delta(mut self, delta: usize) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, child: FormElement) {
        self.children.insert(key.into(), child);
    }

    /// Move every child of `other` into this element.
    pub fn absorb(&mut self, other: FormElement) {
        self.children.extend(other.children);
    }

    pub fn child(&self, key: &str) -> Option<&FormElement> {
        self.children.get(key)
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut FormElement> {
        self.children.get_mut(key)
    }

    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&FormElement> {
        path.iter()
            .try_fold(self, |node, key| node.children.get(key.as_ref()))
    }

    pub fn get_path_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut FormElement> {
        let mut node = self;
        for key in path {
            node = node.children.get_mut(key.as_ref())?;
        }
        Some(node)
    }

    /// Children sorted by weight, then key.
    pub fn sorted_children(&self) -> Vec<(&String, &FormElement)> {
        let mut children: Vec<_> = self.children.iter().collect();
        children.sort_by(|a, b| (a.1.weight, a.0).cmp(&(b.1.weight, b.0)));
        children
    }

    /// Fill in `parents`, `array_parents` and the selector attribute for the
    /// whole subtree below this element.
    pub fn assign_parents(&mut self, parents: Vec<String>, array_parents: Vec<String>) {
        self.attributes
            .insert(SELECTOR_ATTRIBUTE.to_string(), html_id(&array_parents));
        for (key, child) in self.children.iter_mut() {
            let mut child_parents = parents.clone();
            if !child.transparent {
                child_parents.push(key.clone());
            }
            let mut child_array_parents = array_parents.clone();
            child_array_parents.push(key.clone());
            child.assign_parents(child_parents, child_array_parents);
        }
        self.parents = parents;
        self.array_parents = array_parents;
    }

    pub fn selector(&self) -> Option<&str> {
        self.attributes.get(SELECTOR_ATTRIBUTE).map(String::as_str)
    }

    /// The value this element submitted in `input`.
    pub fn value_in<'a>(&self, input: &'a FieldValue) -> Option<&'a FieldValue> {
        input.get_path(&self.parents)
    }

    /// Attach error messages keyed by input parents to matching elements.
    pub fn attach_errors(&mut self, errors: &BTreeMap<Vec<String>, String>) {
        if let Some(message) = errors.get(&self.parents) {
            if !self.errors.contains(message) {
                self.errors.push(message.clone());
            }
        }
        for child in self.children.values_mut() {
            child.attach_errors(errors);
        }
    }

    /// Visit every element in the subtree, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a FormElement)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }

    /// First element in the subtree whose `id` attribute matches.
    pub fn find_by_id(&self, id: &str) -> Option<&FormElement> {
        let mut found = None;
        self.walk(&mut |element| {
            if found.is_none() && element.attributes.get("id").is_some_and(|v| v == id) {
                found = Some(element);
            }
        });
        found
    }
}

/// `edit-` prefixed, hyphenated id built from a structural path.
pub fn html_id<S: AsRef<str>>(path: &[S]) -> String {
    let mut id = String::from("edit");
    for part in path {
        id.push('-');
        id.extend(part.as_ref().chars().map(|c| match c {
            '_' | ' ' | '[' | ']' => '-',
            c => c.to_ascii_lowercase(),
        }));
    }
    id
}
