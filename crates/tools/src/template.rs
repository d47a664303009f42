//! `{argument}` placeholder substitution for URLs, headers and bodies.
//!
//! A placeholder is `{` + identifier + `}` where the identifier is ASCII
//! alphanumerics or `_` and does not start with a digit. Any other `{` is
//! copied through unchanged, so JSON body templates need no escaping.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use toolrelay_core::error::ToolError;

/// How a substituted value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Percent-encoded, for URL path and query segments
    Url,
    /// Inserted as-is, for header values
    Raw,
    /// Strings JSON-escaped without quotes, other values as JSON literals
    Json,
}

/// Result of rendering one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Argument names the template consumed
    pub used: BTreeSet<String>,
}

/// Substitute `arguments` into `template`.
///
/// A placeholder naming an argument that is absent (or null) is an
/// `InvalidArguments` error.
pub fn render(template: &str, arguments: &Map<String, Value>, encoding: Encoding) -> Result<Rendered, ToolError> {
    let mut text = String::with_capacity(template.len());
    let mut used = BTreeSet::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match placeholder(after) {
            Some(name) => {
                let value = arguments
                    .get(name)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| ToolError::InvalidArguments(format!("missing argument '{name}'")))?;
                text.push_str(&encode(value, encoding));
                used.insert(name.to_string());
                rest = &after[name.len() + 1..];
            }
            None => {
                text.push('{');
                rest = after;
            }
        }
    }
    text.push_str(rest);

    Ok(Rendered { text, used })
}

/// The identifier at the start of `s` if it is followed by `}`.
fn placeholder(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let name = &s[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        .then_some(name)
}

fn encode(value: &Value, encoding: Encoding) -> String {
    match (value, encoding) {
        (Value::String(s), Encoding::Url) => urlencoding::encode(s).into_owned(),
        (Value::String(s), Encoding::Raw) => s.clone(),
        (Value::String(s), Encoding::Json) => {
            let quoted = Value::String(s.clone()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        (other, Encoding::Url) => urlencoding::encode(&other.to_string()).into_owned(),
        (other, _) => other.to_string(),
    }
}

/// Render a scalar argument for a query string pair.
pub fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
