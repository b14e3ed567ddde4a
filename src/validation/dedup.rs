//! Label-based deduplication.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{MetricRecord, ParsedData, ParsedRow, RowIssue, TargetField};

use super::rows::row_number;

/// Output of [`dedupe`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DedupResult {
    /// First occurrence of each key, in input order.
    pub unique: Vec<ParsedRow>,
    /// Original label text of every dropped row.
    pub duplicates: Vec<String>,
}

/// Dedup key of a label: trimmed and lower-cased. `None` for blank labels.
pub fn dedup_key(label: &str) -> Option<String> {
    let key = label.trim().to_lowercase();
    (!key.is_empty()).then_some(key)
}

/// Keep the first row per dedup key.
///
/// The key comes from the sanitized `label`; `duplicates` carries each dropped row's
/// `source_label`. Rows with a blank label have no key and appear in neither output list.
pub fn dedupe(rows: &[ParsedRow]) -> DedupResult {
    let split = first_wins(rows);
    DedupResult {
        unique: split.unique.iter().map(|&i| rows[i].clone()).collect(),
        duplicates: split
            .repeats
            .iter()
            .map(|r| rows[r.index].source_label.clone())
            .collect(),
    }
}

struct Repeat {
    index: usize,
    first: usize,
}

#[derive(Default)]
struct FirstWins {
    unique: Vec<usize>,
    repeats: Vec<Repeat>,
}

/// Indices of first occurrences, and of every later row with the index of the row it repeats.
fn first_wins(rows: &[ParsedRow]) -> FirstWins {
    let mut first_seen: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut out = FirstWins::default();

    for (index, row) in rows.iter().enumerate() {
        let Some(key) = dedup_key(&row.label) else {
            continue;
        };
        match first_seen.get(&key) {
            Some(&first) => out.repeats.push(Repeat { index, first }),
            None => {
                first_seen.insert(key, index);
                out.unique.push(index);
            }
        }
    }
    out
}

/// Valid, deduplicated records of a parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    pub records: Vec<MetricRecord>,
    pub duplicates: Vec<String>,
}

/// Deduplicate the valid rows of `data` into typed records.
///
/// Each dropped duplicate adds a warning to `data.errors` pointing at the row it repeats; the
/// issue list is then ordered by row number (stable, so header-row warnings stay first).
pub fn collect_records(data: &mut ParsedData) -> RecordSet {
    let (positions, valid): (Vec<usize>, Vec<ParsedRow>) = data
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.is_valid)
        .map(|(idx, row)| (idx, row.clone()))
        .unzip();

    let split = first_wins(&valid);
    let set = RecordSet {
        records: split
            .unique
            .iter()
            .filter_map(|&i| MetricRecord::from_row(&valid[i]))
            .collect(),
        duplicates: split
            .repeats
            .iter()
            .map(|r| valid[r.index].source_label.clone())
            .collect(),
    };

    if !split.repeats.is_empty() {
        debug!(duplicates = split.repeats.len(), kept = set.records.len(), "dropped duplicate metrics");
        data.errors.extend(split.repeats.iter().map(|r| {
            let source = &valid[r.index].source_label;
            RowIssue::warning(
                row_number(positions[r.index]),
                Some(TargetField::Label),
                format!("duplicate of row {} ('{source}'), skipped", row_number(positions[r.first])),
            )
            .with_suggestion("rename the metric or remove the duplicate row")
        }));
        data.errors.sort_by_key(|issue| issue.row);
    }
    set
}
