//! Mail templates with `{{ name }}` placeholders.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::MailError;

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

/// Template sent after a user changed their account data.
pub const UPDATE_USER_TEMPLATE: &str = "updateuser";

const UPDATE_USER_BODY: &str = "\
Hello {{ name }},

The account data registered for {{ email }} was just updated.
If you did not make this change, please contact support.
";

/// Named mail bodies.
#[derive(Debug, Clone)]
pub struct Templates {
    bodies: HashMap<String, String>,
}

impl Default for Templates {
    fn default() -> Self {
        let mut templates = Self {
            bodies: HashMap::new(),
        };
        templates.insert(UPDATE_USER_TEMPLATE, UPDATE_USER_BODY);
        templates
    }
}

impl Templates {
    /// Add or replace a template.
    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.bodies.insert(name.into(), body.into());
    }

    /// Render `name`, substituting every placeholder from `context`.
    pub fn render(
        &self,
        name: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<String, MailError> {
        let body = self
            .bodies
            .get(name)
            .ok_or_else(|| MailError::UnknownTemplate(name.to_owned()))?;

        if let Some(variable) = PLACEHOLDER_REGEX
            .captures_iter(body)
            .map(|caps| caps[1].to_owned())
            .find(|variable| !context.contains_key(variable))
        {
            return Err(MailError::MissingVariable {
                template: name.to_owned(),
                variable,
            });
        }

        Ok(PLACEHOLDER_REGEX
            .replace_all(body, |caps: &Captures<'_>| {
                context.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}
