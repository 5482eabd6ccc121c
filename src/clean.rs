//! Value-level cleaning shared by every stage. Nothing here returns an error:
//! a value that cannot be interpreted becomes absent or passes through as text.

use chrono::NaiveDate;

const TRUE_TOKENS: [&str; 5] = ["TRUE", "VERDADEIRO", "SIM", "S", "1"];
const FALSE_TOKENS: [&str; 6] = ["FALSE", "FALSO", "NAO", "NÃO", "N", "0"];

/// Two-digit years up to this value land in the 2000s, the rest in the 1900s.
const TWO_DIGIT_YEAR_PIVOT: i32 = 68;

/// Tri-state truth mapping for the yes/no columns of the line-list.
pub fn clean_boolean(value: Option<&str>) -> Option<bool> {
    let token = value?.trim().to_uppercase();
    if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Normalizes code-like values: `"123.0"` becomes `"123"`, non-numeric text passes through.
pub fn clean_code(value: Option<&str>) -> Option<String> {
    let raw = value?;
    if raw.trim().is_empty() {
        return None;
    }
    match parse_number(raw) {
        Some(number) => Some(format_truncated(number)),
        None => Some(raw.to_string()),
    }
}

/// Finite decimal value of a field, if it has one.
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric coercion with truncation toward zero; out-of-range or non-numeric is absent.
pub fn parse_integer(value: Option<&str>) -> Option<i64> {
    let number = parse_number(value?)?.trunc();
    if number < i64::MIN as f64 || number > i64::MAX as f64 {
        return None;
    }
    Some(number as i64)
}

fn format_truncated(number: f64) -> String {
    let truncated = number.trunc();
    if truncated == 0.0 {
        // -0.4 truncates to -0.0, which would otherwise print as "-0".
        "0".to_string()
    } else {
        format!("{truncated:.0}")
    }
}

/// Day-first date parsing over `/` or `-` separated dates, optionally followed by a
/// time part after a space or `T`.
///
/// Accepted shapes are `dd/mm/yyyy`, `dd/mm/yy` and year-first `yyyy/mm/dd`. Any other
/// digit layout is absent rather than guessed.
pub fn parse_date_dayfirst(value: Option<&str>) -> Option<NaiveDate> {
    let raw = value?.trim();
    let end = raw.find([' ', 'T']).unwrap_or(raw.len());
    let date_part = &raw[..end];
    let separator = if date_part.contains('/') { '/' } else { '-' };

    let parts: Vec<&str> = date_part.split(separator).collect();
    let [first, month, last] = parts.as_slice() else {
        return None;
    };
    if !parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    if month.len() > 2 {
        return None;
    }

    let (year, day) = match (first.len(), last.len()) {
        (4, 1..=2) => (first.parse::<i32>().ok()?, last),
        (1..=2, 4) => (last.parse::<i32>().ok()?, first),
        (1..=2, 2) => (expand_two_digit_year(last.parse().ok()?), first),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

fn expand_two_digit_year(year: i32) -> i32 {
    if year <= TWO_DIGIT_YEAR_PIVOT {
        2000 + year
    } else {
        1900 + year
    }
}

/// Trimmed field text, absent when empty.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
