// `$variable` expansion for chart titles and panel messages

use crate::error::{DashboardError, Result};
use std::collections::HashMap;

pub type Variables = HashMap<&'static str, String>;

/// Replace every `$name` in `template` with its value. A `$` not followed by
/// a letter or `_` is copied as is.
pub fn expand(template: &str, variables: &Variables) -> Result<String> {
    let mut pieces = template.split('$');
    let mut output = String::with_capacity(template.len());
    output.push_str(pieces.next().unwrap_or_default());

    for piece in pieces {
        let (name, rest) = split_name(piece);
        if name.is_empty() {
            output.push('$');
            output.push_str(piece);
            continue;
        }
        let value = variables
            .get(name)
            .ok_or_else(|| DashboardError::Encoding(format!("Title variable '${}' not defined", name)))?;
        output.push_str(value);
        output.push_str(rest);
    }

    Ok(output)
}

/// Split a leading variable name off `text`.
fn split_name(text: &str) -> (&str, &str) {
    if !text.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        return ("", text);
    }
    let end = text.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(text.len());
    text.split_at(end)
}
