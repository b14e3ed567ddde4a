//! Scalar sanitizers.
//!
//! Every function here is total: bad input produces a default or `None`, never an error.
//! Deciding whether a row is valid happens in [`super::rows`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{type_aliases, unit_aliases, CURRENCY_SYMBOLS};
use crate::types::{CellValue, MetricType, Unit};

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z!][^>]*>").expect("valid regex"));
static JAVASCRIPT_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid regex"));
static DATA_HTML_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)data\s*:\s*text/html").expect("valid regex"));
static MALICIOUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*script|javascript\s*:|eval\s*\(|expression\s*\(").expect("valid regex")
});

/// Strip markup and script vectors, collapse whitespace, trim, and truncate to `max_chars`.
pub fn sanitize_string(input: &str, max_chars: usize) -> String {
    let s = SCRIPT_BLOCK.replace_all(input, "");
    let s = EVENT_HANDLER.replace_all(&s, "");
    let s = HTML_TAG.replace_all(&s, "");
    let s = JAVASCRIPT_URI.replace_all(&s, "");
    let s = DATA_HTML_URI.replace_all(&s, "");
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
    } else {
        collapsed
    }
}

/// [`sanitize_string`] over any cell; numbers render without a trailing `.0`.
pub fn sanitize_text(cell: &CellValue, max_chars: usize) -> String {
    match cell {
        CellValue::Empty => String::new(),
        CellValue::Text(s) => sanitize_string(s, max_chars),
        CellValue::Number(_) => sanitize_string(&cell.as_text(), max_chars),
    }
}

/// Finite number from a cell, or `None`.
///
/// Numbers pass through if finite. Text has currency symbols, thousands separators and
/// whitespace removed before parsing.
pub fn sanitize_number(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Empty => None,
        CellValue::Number(n) => n.is_finite().then_some(*n),
        CellValue::Text(s) => parse_number(s),
    }
}

/// Parse a human-formatted number such as `"$1,234.50"`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Recognise a unit symbol or alias, case-insensitively.
pub fn parse_unit(raw: &str) -> Option<Unit> {
    let key = raw.trim().to_lowercase();
    [
        (Unit::Count, unit_aliases::COUNT),
        (Unit::Currency, unit_aliases::CURRENCY),
        (Unit::Percent, unit_aliases::PERCENT),
        (Unit::People, unit_aliases::PEOPLE),
    ]
    .into_iter()
    .find(|(unit, aliases)| unit.symbol().eq_ignore_ascii_case(&key) || aliases.contains(&key.as_str()))
    .map(|(unit, _)| unit)
}

/// Unit for `raw`, defaulting to [`Unit::Count`]. Never rejects.
pub fn sanitize_unit(raw: &str) -> Unit {
    parse_unit(raw).unwrap_or_default()
}

/// Recognise a metric type or alias, case-insensitively.
pub fn parse_type(raw: &str) -> Option<MetricType> {
    let key = raw.trim().to_lowercase();
    if type_aliases::OUTPUT.contains(&key.as_str()) {
        Some(MetricType::Output)
    } else if type_aliases::OUTCOME.contains(&key.as_str()) {
        Some(MetricType::Outcome)
    } else {
        None
    }
}

/// Metric type for `raw`, defaulting to [`MetricType::Output`]. Never rejects.
pub fn sanitize_type(raw: &str) -> MetricType {
    parse_type(raw).unwrap_or_default()
}

/// Script tags, `javascript:`, `eval(` or `expression(` anywhere in `text`.
///
/// Independent of [`sanitize_string`]; meant for the persistence boundary.
pub fn contains_malicious_patterns(text: &str) -> bool {
    MALICIOUS.is_match(text)
}
