//! Exposition canonicalization
//!
//! Client libraries emit `<name>_created` series carrying creation timestamps
//! and print values such as `12.000000000002` or `2.216426689e+09`. Neither
//! means anything for period statistics, so [`canonicalize`] drops the former
//! and writes near-integral values as exact integers. Comment lines are left
//! alone. Applying it twice is the same as applying it once.

use crate::family::format_value;

/// Suffix of the creation-timestamp series
pub const CREATED_SUFFIX: &str = "_created";

/// Largest distance from an integer still written as that integer
pub const INTEGER_TOLERANCE: f64 = 1e-6;

// Beyond 2^53 not every integer is representable.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Canonicalize an exposition document
#[must_use]
pub fn canonicalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push_str(line);
            out.push('\n');
            continue;
        }

        let name_end = trimmed
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(trimmed.len());
        if trimmed[..name_end].ends_with(CREATED_SUFFIX) {
            continue;
        }

        let indent = &line[..line.len() - trimmed.len()];
        out.push_str(indent);
        match value_span(trimmed, name_end) {
            Some((start, end)) => {
                out.push_str(&trimmed[..start]);
                out.push_str(&canonical_value(&trimmed[start..end]));
                out.push_str(&trimmed[end..]);
            }
            None => out.push_str(trimmed),
        }
        out.push('\n');
    }

    if !text.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Byte range of the sample value in `line`, labels skipped quote-aware.
fn value_span(line: &str, name_end: usize) -> Option<(usize, usize)> {
    let mut pos = name_end;
    let bytes = line.as_bytes();

    if bytes.get(pos) == Some(&b'{') {
        let mut in_quotes = false;
        let mut escaped = false;
        let mut close = None;
        for (idx, ch) in line[pos..].char_indices() {
            if escaped {
                escaped = false;
            } else if in_quotes {
                match ch {
                    '\\' => escaped = true,
                    '"' => in_quotes = false,
                    _ => {}
                }
            } else if ch == '"' {
                in_quotes = true;
            } else if ch == '}' {
                close = Some(pos + idx);
                break;
            }
        }
        pos = close? + 1;
    }

    let start = pos + line[pos..].find(|c: char| !c.is_whitespace())?;
    let end = line[start..]
        .find(char::is_whitespace)
        .map_or(line.len(), |off| start + off);
    Some((start, end))
}

fn canonical_value(token: &str) -> String {
    let Ok(value) = token.parse::<f64>() else {
        return token.to_string();
    };
    if !value.is_finite() || value.abs() >= EXACT_INTEGER_LIMIT {
        return token.to_string();
    }
    let rounded = value.round();
    if (value - rounded).abs() <= INTEGER_TOLERANCE {
        // `+ 0.0` turns a negative zero into zero.
        format_value(rounded + 0.0)
    } else {
        token.to_string()
    }
}
