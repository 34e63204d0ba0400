//! Constant-label formatting.
//!
//! Operators pass labels as `key=value`; templates expect a ready-made
//! matcher fragment (`key="value",other="x"`).

use crate::error::{Error, Result};

/// Turn one `key=value` string into a `key="value"` matcher.
pub fn format_label(raw: &str) -> Result<String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::InvalidLabel(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() || !is_label_name(key) {
        return Err(Error::InvalidLabel(raw.to_string()));
    }
    let value = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("{key}=\"{value}\""))
}

/// Format every label and join them with commas.
pub fn format_labels<S: AsRef<str>>(raw: &[S]) -> Result<String> {
    let formatted = raw
        .iter()
        .map(|l| format_label(l.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(formatted.join(","))
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
