//! Formatter Registry - Field Type Dispatch
//!
//! Raw stored value + declared field type -> display string.
//! Missing data formats as "n/a"; formatters are pure and deterministic.

use serde::{Deserialize, Serialize};

/// Display used whenever a field has no usable value.
pub const NOT_AVAILABLE: &str = "n/a";

/// Closed set of field types a descriptor may declare.
/// Adding a type is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Select,
    Radio,
}

impl Default for FieldType {
    fn default() -> Self {
        Self::Text
    }
}

/// Format a raw value under the rules for `field_type`.
///
/// `None` and empty-string input map to `"n/a"` for every type.
pub fn format_value(field_type: FieldType, raw: Option<&str>) -> String {
    let raw = match raw {
        Some(v) if !v.is_empty() => v,
        _ => return NOT_AVAILABLE.to_string(),
    };

    match field_type {
        FieldType::Text => raw.to_string(),
        FieldType::Number => clean_numeric(raw),
        FieldType::Currency => format_currency_str(raw),
        FieldType::Select => raw.to_string(),
        FieldType::Radio => normalize_radio(raw),
    }
}

/// Strip everything except digits, the decimal point, and a minus sign.
/// Units are template-side literal text, never part of the value.
fn clean_numeric(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect()
}

fn format_currency_str(raw: &str) -> String {
    let cleaned = clean_numeric(raw);
    match cleaned.parse::<f64>() {
        Ok(n) => format_currency(n),
        Err(_) => NOT_AVAILABLE.to_string(),
    }
}

/// Fixed currency-style display: `$` prefix, exactly two decimals.
pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// Two-decimal cost display without the currency prefix, used for the
/// aggregate totals and per-record cost tokens.
pub fn format_cost(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Canonicalize yes/no answers regardless of stored case.
/// Anything else passes through unchanged.
fn normalize_radio(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "yes" => "Yes".to_string(),
        "no" => "No".to_string(),
        _ => raw.to_string(),
    }
}
