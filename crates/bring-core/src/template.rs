//! `{{ name }}` placeholder substitution.

use std::sync::LazyLock;

use bring_schema::{Vars, scalar_to_string};
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*\}\}").expect("valid placeholder regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved placeholder '{{{{ {name} }}}}' in '{text}'")]
    Unresolved { name: String, text: String },
}

/// Replace every placeholder in `text` with its value from `vars`.
///
/// # Errors
///
/// Fails on the first placeholder that has no value.
pub fn render_str(text: &str, vars: &Vars) -> Result<String, TemplateError> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }
    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        if let Some(value) = vars.get(name) {
            scalar_to_string(value)
        } else {
            missing.get_or_insert_with(|| name.to_string());
            String::new()
        }
    });
    match missing {
        Some(name) => Err(TemplateError::Unresolved {
            name,
            text: text.to_string(),
        }),
        None => Ok(rendered.into_owned()),
    }
}

/// Recursively render every string inside a JSON value.
pub fn render_value(value: &Value, vars: &Vars) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => Value::String(render_str(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, vars))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, vars)?)))
                .collect::<Result<_, TemplateError>>()?,
        ),
        other => other.clone(),
    })
}

/// Names of all placeholders referenced in `text`.
pub fn placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}
