//! Filter formulas for the record API's `filterByFormula` parameter.

use chrono::{DateTime, SecondsFormat, Utc};

/// Single-quoted string literal with backslashes and quotes escaped.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

pub fn field(name: &str) -> String {
    format!("{{{name}}}")
}

pub fn eq(name: &str, value: &str) -> String {
    format!("{} = {}", field(name), quote(value))
}

pub fn and<I: IntoIterator<Item = String>>(parts: I) -> String {
    combine("AND", parts)
}

pub fn or<I: IntoIterator<Item = String>>(parts: I) -> String {
    combine("OR", parts)
}

fn combine<I: IntoIterator<Item = String>>(op: &str, parts: I) -> String {
    let parts: Vec<String> = parts.into_iter().collect();
    match parts.len() {
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("{op}({})", parts.join(", ")),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    quote(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Field strictly after `at`.
pub fn after(name: &str, at: DateTime<Utc>) -> String {
    format!("IS_AFTER({}, {})", field(name), timestamp(at))
}

/// Field at or after `at`.
pub fn at_or_after(name: &str, at: DateTime<Utc>) -> String {
    format!("NOT(IS_BEFORE({}, {}))", field(name), timestamp(at))
}

/// `left`/`right` hold `a` and `b` in either order.
pub fn between(left: &str, right: &str, a: &str, b: &str) -> String {
    or([
        and([eq(left, a), eq(right, b)]),
        and([eq(left, b), eq(right, a)]),
    ])
}

/// Either field holds `value`.
pub fn either(left: &str, right: &str, value: &str) -> String {
    or([eq(left, value), eq(right, value)])
}
