use crate::form::FormElement;

#[derive(Debug, Clone, PartialEq)]
pub enum AjaxCommand {
    /// Replace the DOM subtree matched by `selector` with `element`.
    Replace { selector: String, element: FormElement },
    /// Show validation messages above the matched subtree.
    Messages { selector: String, messages: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AjaxResponse {
    commands: Vec<AjaxCommand>,
}

impl AjaxResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, command: AjaxCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[AjaxCommand] {
        &self.commands
    }

    /// The element of the first replace command, if any.
    pub fn replaced_element(&self) -> Option<&FormElement> {
        self.commands.iter().find_map(|command| match command {
            AjaxCommand::Replace { element, .. } => Some(element),
            _ => None,
        })
    }

    pub fn messages(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                AjaxCommand::Messages { messages, .. } => Some(messages),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }
}
