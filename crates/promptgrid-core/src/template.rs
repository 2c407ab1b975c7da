//! Placeholder extraction and rendering.
//!
//! Three bracket syntaxes are recognised: `{{name}}`, `{$name}` and `{name}`.
//! The template is scanned once, left to right; at each position the syntaxes
//! are tried in that order, so `{{name}}` is never read as `{name}` wrapped in
//! stray braces, and a substituted value is never scanned again.

use crate::model::Row;
use regex::{Captures, Regex};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("missing variable '{name}': no value bound for placeholder")]
    MissingVariable { name: String },
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{(\w+)\}\}|\{\$(\w+)\}|\{(\w+)\}").expect("static placeholder pattern")
    })
}

fn captured_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

/// Distinct variable names in first-occurrence order.
pub fn extract(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        let name = captured_name(&caps);
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// String form of a bound value: strings verbatim, null as empty, anything else as JSON.
pub fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute bound placeholders.
///
/// With `strict == false` unbound placeholders are left verbatim; with
/// `strict == true` the first unbound placeholder is an error.
pub fn render(template: &str, bindings: &Row, strict: bool) -> Result<String, TemplateError> {
    let re = placeholder_re();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let name = captured_name(&caps);
        out.push_str(&template[last..whole.start()]);
        match bindings.get(name) {
            Some(v) => out.push_str(&value_to_string(v)),
            None if strict => {
                return Err(TemplateError::MissingVariable {
                    name: name.to_string(),
                })
            }
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Rewrite every placeholder into the double-brace form, leaving other text untouched.
pub fn normalize(template: &str) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures<'_>| format!("{{{{{}}}}}", captured_name(caps)))
        .into_owned()
}
