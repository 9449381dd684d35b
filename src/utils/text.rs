// Text utils

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w+\b").expect("word regex is valid"));

/// Lowercased set of the words in `text`, used for support-vocabulary overlap.
pub fn word_set(text: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Quotes a CSV field when it contains a delimiter, quote or newline.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
