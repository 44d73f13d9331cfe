use crate::error::{NotifyError, Result};
use std::collections::BTreeMap;

/// Placeholder values handed to the templating collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Replaces every `{{name}}` in `template` with its value.
///
/// A placeholder without a value is an error rather than being left in the
/// text, so a typo in a custom message never reaches a recipient.
pub fn substitute(template: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            NotifyError::Template(format!("unclosed placeholder in '{template}'"))
        })?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| NotifyError::Template(format!("no value for '{{{{{name}}}}}'")))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
