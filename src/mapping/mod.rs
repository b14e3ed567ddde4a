//! Column mapping: which source column feeds which [`TargetField`].
//!
//! Headers are scored against a fixed alias table per target. Assignment is greedy and
//! position-dependent: headers are visited in file order and each claims the best-scoring target
//! that is still free. A later header never steals a target from an earlier one, even if it would
//! score higher.

use tracing::debug;

use crate::config::ImportConfig;
use crate::constants::{header_aliases, SUBSTRING_SCORE};
use crate::types::{ColumnMapping, MappingResult, RowIssue, TargetField};

/// Row number used for issues that concern the header row.
pub const HEADER_ROW: usize = 1;

/// Alias table for `target`.
pub fn aliases_for(target: TargetField) -> &'static [&'static str] {
    match target {
        TargetField::Label => header_aliases::LABEL,
        TargetField::Value => header_aliases::VALUE,
        TargetField::Unit => header_aliases::UNIT,
        TargetField::Type => header_aliases::TYPE,
        TargetField::Comparison => header_aliases::COMPARISON,
        TargetField::PreviousValue => header_aliases::PREVIOUS_VALUE,
    }
}

/// Lower-case, trim, and treat `_`/`-` as spaces so `previous_value` reads like `previous value`.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Levenshtein distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Similarity of two already-normalized strings, in `[0, 1]`.
///
/// Identical strings score `1.0`, containment scores [`SUBSTRING_SCORE`], anything else
/// `1 - distance / max_len`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return SUBSTRING_SCORE;
    }
    let max_len = a.chars().count().max(b.chars().count()) as f64;
    (1.0 - levenshtein(a, b) as f64 / max_len).max(0.0)
}

/// Best alias score of a normalized header for `target`.
pub fn score(normalized_header: &str, target: TargetField) -> f64 {
    aliases_for(target)
        .iter()
        .map(|alias| similarity(normalized_header, alias))
        .fold(0.0, f64::max)
}

/// Map `headers` automatically.
///
/// Each header takes the highest-scoring unclaimed target with a score at or above
/// `config.match_threshold`; ties go to the target listed first in [`TargetField::ALL`].
/// Mapping is deterministic: the same headers always produce the same result.
pub fn auto_map(headers: &[String], config: &ImportConfig) -> MappingResult {
    let mut claimed: Vec<TargetField> = Vec::new();
    let mut mappings = Vec::with_capacity(headers.len());

    for header in headers {
        let normalized = normalize_header(header);
        let mut best: Option<(TargetField, f64)> = None;

        if !normalized.is_empty() {
            for target in TargetField::ALL {
                if claimed.contains(&target) {
                    continue;
                }
                let s = score(&normalized, target);
                if s >= config.match_threshold && best.is_none_or(|(_, b)| s > b) {
                    best = Some((target, s));
                }
            }
        }

        let mapping = match best {
            Some((target, confidence)) => {
                claimed.push(target);
                ColumnMapping {
                    source: header.clone(),
                    target: Some(target),
                    confidence,
                    is_required: target.is_required(),
                }
            }
            None => unmapped(header),
        };
        mappings.push(mapping);
    }

    let result = finish(mappings, config.confirm_threshold);
    debug!(
        headers = headers.len(),
        valid = result.is_valid,
        needs_manual = result.needs_manual_mapping,
        "auto-mapped columns"
    );
    result
}

/// Build a mapping from explicit `(source header, target)` assignments.
///
/// Source names are matched case-insensitively after trimming. Headers without an assignment are
/// unmapped. If two headers are assigned the same target, the first one in file order keeps it.
/// Every manual assignment has confidence `1.0`.
pub fn manual_mapping(headers: &[String], assignments: &[(String, TargetField)]) -> MappingResult {
    let mut claimed: Vec<TargetField> = Vec::new();
    let mappings = headers
        .iter()
        .map(|header| {
            let wanted = assignments
                .iter()
                .find(|(source, _)| source.trim().eq_ignore_ascii_case(header.trim()))
                .map(|(_, target)| *target);
            match wanted {
                Some(target) if !claimed.contains(&target) => {
                    claimed.push(target);
                    ColumnMapping {
                        source: header.clone(),
                        target: Some(target),
                        confidence: 1.0,
                        is_required: target.is_required(),
                    }
                }
                _ => unmapped(header),
            }
        })
        .collect();

    finish(mappings, 1.0)
}

/// Warnings for mapped columns whose confidence is below `confirm_threshold`.
pub fn mapping_warnings(result: &MappingResult, confirm_threshold: f64) -> Vec<RowIssue> {
    result
        .mappings
        .iter()
        .filter_map(|m| {
            let target = m.target?;
            (m.confidence < confirm_threshold).then(|| {
                RowIssue::warning(
                    HEADER_ROW,
                    Some(target),
                    format!(
                        "column '{}' was matched to '{}' with {:.0}% confidence",
                        m.source,
                        target,
                        m.confidence * 100.0
                    ),
                )
                .with_suggestion("confirm the column mapping before importing")
            })
        })
        .collect()
}

fn unmapped(header: &str) -> ColumnMapping {
    ColumnMapping {
        source: header.to_string(),
        target: None,
        confidence: 0.0,
        is_required: false,
    }
}

fn finish(mappings: Vec<ColumnMapping>, confirm_threshold: f64) -> MappingResult {
    let has = |t: TargetField| mappings.iter().any(|m| m.target == Some(t));
    let is_valid = has(TargetField::Label) && has(TargetField::Value);
    let low_confidence = mappings
        .iter()
        .any(|m| m.target.is_some() && m.confidence < confirm_threshold);
    MappingResult {
        is_valid,
        needs_manual_mapping: !is_valid || low_confidence,
        mappings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn targets(result: &MappingResult) -> Vec<Option<TargetField>> {
        result.mappings.iter().map(|m| m.target).collect()
    }

    #[test]
    fn similarity_rules() {
        assert_eq!(similarity("amount", "amount"), 1.0);
        assert_eq!(similarity("metric name", "name"), SUBSTRING_SCORE);
        assert!((similarity("amnt", "amount") - (1.0 - 2.0 / 6.0)).abs() < 1e-9);
        assert_eq!(similarity("", "value"), 0.0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn metric_name_and_amount_map_confidently() {
        let r = auto_map(&headers(&["Metric Name", "Amount"]), &ImportConfig::default());
        assert_eq!(targets(&r), vec![Some(TargetField::Label), Some(TargetField::Value)]);
        assert!(r.mappings.iter().all(|m| m.confidence >= 0.8));
        assert!(r.is_valid);
        assert!(!r.needs_manual_mapping);
        assert!(r.mappings[0].is_required);
    }

    #[test]
    fn mapping_is_deterministic() {
        let h = headers(&["Name", "Total", "UOM", "Category", "Baseline", "Prior Value", "Notes"]);
        let cfg = ImportConfig::default();
        assert_eq!(auto_map(&h, &cfg), auto_map(&h, &cfg));
    }

    #[test]
    fn best_target_wins_within_a_header() {
        let r = auto_map(
            &headers(&["label", "previous_value", "value"]),
            &ImportConfig::default(),
        );
        assert_eq!(
            targets(&r),
            vec![
                Some(TargetField::Label),
                Some(TargetField::PreviousValue),
                Some(TargetField::Value)
            ]
        );
    }

    #[test]
    fn first_header_keeps_a_claimed_target() {
        let r = auto_map(&headers(&["name", "label", "value"]), &ImportConfig::default());
        assert_eq!(r.mappings[0].target, Some(TargetField::Label));
        assert_eq!(r.mappings[1].target, None);
        assert_eq!(r.mappings[2].target, Some(TargetField::Value));
    }

    #[test]
    fn low_confidence_needs_confirmation() {
        let r = auto_map(&headers(&["label", "amnt"]), &ImportConfig::default());
        assert_eq!(r.mappings[1].target, Some(TargetField::Value));
        assert!(r.is_valid);
        assert!(r.needs_manual_mapping);

        let warnings = mapping_warnings(&r, 0.8);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].row, HEADER_ROW);
        assert_eq!(warnings[0].field, Some(TargetField::Value));
    }

    #[test]
    fn missing_required_target_is_invalid() {
        let r = auto_map(&headers(&["label", "", "zzzz"]), &ImportConfig::default());
        assert!(!r.is_valid);
        assert!(r.needs_manual_mapping);
        assert_eq!(r.missing_required(), vec![TargetField::Value]);
        assert_eq!(r.mappings[1].target, None);
    }

    #[test]
    fn manual_assignments_have_full_confidence() {
        let h = headers(&["Col A", "Col B", "Col C"]);
        let r = manual_mapping(
            &h,
            &[
                ("col a".to_string(), TargetField::Label),
                ("Col B".to_string(), TargetField::Value),
                ("Col C".to_string(), TargetField::Value),
            ],
        );
        assert_eq!(
            targets(&r),
            vec![Some(TargetField::Label), Some(TargetField::Value), None]
        );
        assert!(r.is_valid);
        assert!(!r.needs_manual_mapping);
        assert!(r.mappings[..2].iter().all(|m| m.confidence == 1.0));
    }
}
