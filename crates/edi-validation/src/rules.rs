//! Element value rules
//!
//! Each check looks at one component value against one [`ElementRule`] and
//! returns a [`Violation`] describing the first problem it finds. Empty
//! values are only subject to the `required` rule, which the engine checks
//! before calling into this module.

use crate::codelist::{CodeListRegistry, CodeListResult};
use chrono::{NaiveDate, NaiveTime};
use edi_schema::{DataType, ElementRule};
use tracing::warn;

/// One broken value rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub message: String,
    pub value: String,
    pub expected: String,
}

impl Violation {
    fn new(message: impl Into<String>, value: &str, expected: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// Run every value check of `rule` against `value`
#[must_use]
pub fn check_value(value: &str, rule: &ElementRule, code_lists: Option<&CodeListRegistry>) -> Vec<Violation> {
    [
        check_length(value, rule),
        check_data_type(value, rule.data_type),
        check_codes(value, rule),
        check_code_list(value, rule, code_lists),
        check_pattern(value, rule),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Length in the units the type is measured in
///
/// Numeric lengths exclude the sign and decimal point.
#[must_use]
pub fn measured_length(value: &str, data_type: DataType) -> usize {
    match data_type {
        DataType::Numeric { .. } | DataType::Decimal => {
            value.chars().filter(char::is_ascii_digit).count()
        }
        _ => value.chars().count(),
    }
}

#[must_use]
pub fn check_length(value: &str, rule: &ElementRule) -> Option<Violation> {
    let length = measured_length(value, rule.data_type);
    if length < rule.min_length {
        return Some(Violation::new(
            format!("Value length {length} is below minimum {}", rule.min_length),
            value,
            format!("min length {}", rule.min_length),
        ));
    }
    match rule.max_length {
        Some(max) if length > max => Some(Violation::new(
            format!("Value length {length} exceeds maximum {max}"),
            value,
            format!("max length {max}"),
        )),
        _ => None,
    }
}

#[must_use]
pub fn check_data_type(value: &str, data_type: DataType) -> Option<Violation> {
    let valid = match data_type {
        DataType::Alphanumeric | DataType::Identifier => !value.chars().any(char::is_control),
        DataType::Alphabetic => value.chars().all(|c| c.is_ascii_alphabetic() || c == ' '),
        DataType::Numeric { .. } => is_integer(value),
        DataType::Decimal => is_decimal(value),
        DataType::Date => is_date(value),
        DataType::Time => is_time(value),
    };
    (!valid).then(|| {
        Violation::new(
            format!("Value '{value}' is not a valid {data_type}"),
            value,
            data_type.to_string(),
        )
    })
}

#[must_use]
pub fn check_codes(value: &str, rule: &ElementRule) -> Option<Violation> {
    if rule.codes.is_empty() || rule.codes.iter().any(|c| c == value) {
        return None;
    }
    Some(Violation::new(
        format!("Code '{value}' is not permitted"),
        value,
        format!("one of {}", rule.codes.join(", ")),
    ))
}

#[must_use]
pub fn check_code_list(
    value: &str,
    rule: &ElementRule,
    code_lists: Option<&CodeListRegistry>,
) -> Option<Violation> {
    let name = rule.code_list.as_deref()?;
    let Some(registry) = code_lists else {
        warn!("No code lists configured; skipping list {}", name);
        return None;
    };
    match registry.check(name, value) {
        CodeListResult::Valid => None,
        CodeListResult::ListNotFound { list_name } => {
            warn!("Unknown code list {}", list_name);
            None
        }
        CodeListResult::Invalid { code, list_name } => Some(Violation::new(
            format!("Code '{code}' is not in code list {list_name}"),
            value,
            format!("code list {list_name}"),
        )),
    }
}

#[must_use]
pub fn check_pattern(value: &str, rule: &ElementRule) -> Option<Violation> {
    let pattern = rule.pattern.as_ref()?;
    (!pattern.is_match(value)).then(|| {
        Violation::new(
            format!("Value '{value}' does not match pattern {}", pattern.as_str()),
            value,
            format!("pattern {}", pattern.as_str()),
        )
    })
}

fn unsigned(value: &str) -> &str {
    value.strip_prefix('-').unwrap_or(value)
}

fn is_integer(value: &str) -> bool {
    let digits = unsigned(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_decimal(value: &str) -> bool {
    let number = unsigned(value);
    let (whole, fraction) = number.split_once(['.', ',']).unwrap_or((number, ""));
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    !(whole.is_empty() && fraction.is_empty()) && all_digits(whole) && all_digits(fraction)
}

fn is_date(value: &str) -> bool {
    match value.len() {
        8 => NaiveDate::parse_from_str(value, "%Y%m%d").is_ok(),
        6 => NaiveDate::parse_from_str(value, "%y%m%d").is_ok(),
        _ => false,
    }
}

fn is_time(value: &str) -> bool {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match value.len() {
        4 => NaiveTime::parse_from_str(value, "%H%M").is_ok(),
        6..=8 => NaiveTime::parse_from_str(&value[..6], "%H%M%S").is_ok(),
        _ => false,
    }
}
