//! Projection of raw rows through a column mapping.

use std::ops::Range;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::config::ImportConfig;
use crate::ingestion::{ParseObserver, ParseProgress};
use crate::mapping::{mapping_warnings, HEADER_ROW};
use crate::types::{
    CellValue, MappingResult, ParsedData, ParsedRow, RawTable, RowIssue, TargetField,
};

use super::sanitize::{parse_type, parse_unit, sanitize_number, sanitize_string, sanitize_text};

const MESSAGE_VALUE_CHARS: usize = 50;

/// Column index of each target field, resolved once per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    pub label: Option<usize>,
    pub value: Option<usize>,
    pub unit: Option<usize>,
    pub metric_type: Option<usize>,
    pub comparison: Option<usize>,
    pub previous_value: Option<usize>,
}

impl ColumnIndex {
    pub fn from_mapping(mapping: &MappingResult) -> Self {
        Self {
            label: mapping.column_for(TargetField::Label),
            value: mapping.column_for(TargetField::Value),
            unit: mapping.column_for(TargetField::Unit),
            metric_type: mapping.column_for(TargetField::Type),
            comparison: mapping.column_for(TargetField::Comparison),
            previous_value: mapping.column_for(TargetField::PreviousValue),
        }
    }
}

/// Spreadsheet row number of the data row at `index` (header is row 1).
pub fn row_number(index: usize) -> usize {
    index + HEADER_ROW + 1
}

/// Sanitize and validate one raw row.
///
/// A row is valid when its label is non-empty after sanitization and its value parses to a
/// finite number. Unit, type, comparison and previous value never invalidate a row; an
/// unrecognised unit or type falls back to its default with a warning.
pub fn project_row(
    cells: &[CellValue],
    row: usize,
    columns: &ColumnIndex,
    max_text_length: usize,
) -> (ParsedRow, Vec<RowIssue>) {
    let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i)).unwrap_or(&CellValue::Empty);
    let mut issues = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    let raw_label = cell(columns.label);
    let label = sanitize_text(raw_label, max_text_length);
    if label.is_empty() {
        let msg = "label is required".to_string();
        issues.push(
            RowIssue::error(row, TargetField::Label, msg.clone())
                .with_suggestion("enter a name for this metric"),
        );
        errors.push(msg);
    }

    let raw_value = cell(columns.value);
    let value = sanitize_number(raw_value);
    if value.is_none() {
        let msg = if raw_value.is_empty() {
            "value is required".to_string()
        } else {
            format!("'{}' is not a valid number", quoted(raw_value))
        };
        issues.push(
            RowIssue::error(row, TargetField::Value, msg.clone())
                .with_suggestion("use a plain number, e.g. 1234.5"),
        );
        errors.push(msg);
    }

    let raw_unit = cell(columns.unit);
    let unit = if raw_unit.is_empty() {
        Default::default()
    } else {
        parse_unit(&raw_unit.as_text()).unwrap_or_else(|| {
            issues.push(
                RowIssue::warning(
                    row,
                    Some(TargetField::Unit),
                    format!("unrecognized unit '{}', using '#'", quoted(raw_unit)),
                )
                .with_suggestion("use one of #, $, %, People"),
            );
            Default::default()
        })
    };

    let raw_type = cell(columns.metric_type);
    let metric_type = if raw_type.is_empty() {
        Default::default()
    } else {
        parse_type(&raw_type.as_text()).unwrap_or_else(|| {
            issues.push(
                RowIssue::warning(
                    row,
                    Some(TargetField::Type),
                    format!("unrecognized type '{}', using 'output'", quoted(raw_type)),
                )
                .with_suggestion("use output or outcome"),
            );
            Default::default()
        })
    };

    let comparison = Some(sanitize_text(cell(columns.comparison), max_text_length))
        .filter(|c| !c.is_empty());

    let raw_previous = cell(columns.previous_value);
    let previous_value = sanitize_number(raw_previous);
    if previous_value.is_none() && !raw_previous.is_empty() {
        issues.push(RowIssue::warning(
            row,
            Some(TargetField::PreviousValue),
            format!("previous value '{}' is not a number and was ignored", quoted(raw_previous)),
        ));
    }

    let is_valid = errors.is_empty();
    let parsed = ParsedRow {
        label,
        source_label: raw_label.as_text(),
        value,
        unit,
        metric_type,
        comparison,
        previous_value,
        is_valid,
        error: (!is_valid).then(|| errors.join("; ")),
    };
    (parsed, issues)
}

/// Project every row of `table` through `mapping`.
///
/// Rows are handled in chunks of `chunk_size`; with a `pool`, rows inside a chunk are projected
/// in parallel while chunks themselves run in order. `observer` is told after each chunk and
/// checked for a stop request before the next one; a stop returns `None`.
///
/// Low-confidence mapping warnings come first in the issue list, followed by row issues in row
/// order.
pub fn project_rows(
    table: &RawTable,
    mapping: &MappingResult,
    config: &ImportConfig,
    pool: Option<&ThreadPool>,
    chunk_size: usize,
    observer: &mut dyn ParseObserver,
) -> Option<ParsedData> {
    let columns = ColumnIndex::from_mapping(mapping);
    let total = table.row_count();
    let max_text = config.max_text_length;

    let mut rows = Vec::with_capacity(total);
    let mut errors = mapping_warnings(mapping, config.confirm_threshold);

    for range in chunk_ranges(total, chunk_size.max(1)) {
        if observer.should_stop() {
            return None;
        }
        let start = range.start;
        let chunk = &table.rows[range];
        let projected: Vec<(ParsedRow, Vec<RowIssue>)> = match pool {
            Some(pool) => pool.install(|| {
                chunk
                    .par_iter()
                    .enumerate()
                    .map(|(i, cells)| project_row(cells, row_number(start + i), &columns, max_text))
                    .collect()
            }),
            None => chunk
                .iter()
                .enumerate()
                .map(|(i, cells)| project_row(cells, row_number(start + i), &columns, max_text))
                .collect(),
        };
        for (row, issues) in projected {
            rows.push(row);
            errors.extend(issues);
        }
        observer.on_rows(ParseProgress {
            rows_read: rows.len(),
            total_rows: Some(total),
            fraction: rows.len() as f64 / total.max(1) as f64,
        });
    }

    let valid_rows = rows.iter().filter(|r| r.is_valid).count();
    Some(ParsedData {
        headers: table.headers.clone(),
        total_rows: total,
        valid_rows,
        invalid_rows: total - valid_rows,
        rows,
        errors,
    })
}

fn quoted(cell: &CellValue) -> String {
    sanitize_string(&cell.as_text(), MESSAGE_VALUE_CHARS)
}

fn chunk_ranges(row_count: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let mut out = Vec::with_capacity(row_count.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + chunk_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::auto_map;
    use crate::types::{IssueSeverity, MetricType, Unit};
    use rayon::ThreadPoolBuilder;

    fn text(s: &str) -> CellValue {
        CellValue::from_text(s)
    }

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter().map(|r| r.iter().map(|c| text(c)).collect()).collect(),
        )
    }

    fn project(t: &RawTable) -> ParsedData {
        let cfg = ImportConfig::default();
        let mapping = auto_map(&t.headers, &cfg);
        project_rows(t, &mapping, &cfg, None, 256, &mut ()).unwrap()
    }

    #[test]
    fn single_row_gets_defaults() {
        let data = project(&table(&["label", "value"], &[&["Meals Served", "5000"]]));
        assert_eq!(data.total_rows, 1);
        assert_eq!(data.valid_rows, 1);
        let row = &data.rows[0];
        assert_eq!(row.label, "Meals Served");
        assert_eq!(row.value, Some(5000.0));
        assert_eq!(row.unit, Unit::Count);
        assert_eq!(row.metric_type, MetricType::Output);
        assert!(row.is_valid);
        assert!(data.errors.is_empty());
    }

    #[test]
    fn source_label_keeps_the_cell_as_written() {
        let data = project(&table(&["label", "value"], &[&["  meals   served ", "1"]]));
        assert_eq!(data.rows[0].label, "meals served");
        assert_eq!(data.rows[0].source_label, "  meals   served ");
    }

    #[test]
    fn missing_label_and_bad_value_are_row_errors() {
        let data = project(&table(
            &["label", "value"],
            &[&["", "5000"], &["Foo", "notanumber"], &["Bar", "10"]],
        ));
        assert_eq!(data.total_rows, 3);
        assert_eq!(data.valid_rows, 1);
        assert_eq!(data.invalid_rows, 2);
        assert_eq!(data.error_count(), 2);

        assert_eq!(data.errors[0].row, 2);
        assert_eq!(data.errors[0].field, Some(TargetField::Label));
        assert_eq!(data.errors[1].row, 3);
        assert_eq!(data.errors[1].field, Some(TargetField::Value));
        assert!(data.errors[1].message.contains("notanumber"));
        assert_eq!(data.rows[1].error.as_deref(), Some("'notanumber' is not a valid number"));
    }

    #[test]
    fn unknown_unit_and_type_warn_but_stay_valid() {
        let data = project(&table(
            &["label", "value", "unit", "type", "previous value"],
            &[&["Trees", "$1,200", "saplings", "planting", "n/a"]],
        ));
        let row = &data.rows[0];
        assert!(row.is_valid);
        assert_eq!(row.value, Some(1200.0));
        assert_eq!(row.unit, Unit::Count);
        assert_eq!(row.metric_type, MetricType::Output);
        assert_eq!(row.previous_value, None);
        assert_eq!(data.warning_count(), 3);
        assert!(data.errors.iter().all(|e| e.severity == IssueSeverity::Warning));
    }

    #[test]
    fn recognised_values_are_normalised() {
        let data = project(&table(
            &["label", "value", "unit", "type", "comparison"],
            &[&["<b>Youth</b>  served", "42", "Individuals", "Impact", " up 5% "]],
        ));
        let row = &data.rows[0];
        assert_eq!(row.label, "Youth served");
        assert_eq!(row.unit, Unit::People);
        assert_eq!(row.metric_type, MetricType::Outcome);
        assert_eq!(row.comparison.as_deref(), Some("up 5%"));
    }

    #[test]
    fn pooled_projection_matches_sequential() {
        let rows: Vec<Vec<String>> = (0..1000)
            .map(|i| vec![format!("m{i}"), if i % 7 == 0 { "x".to_string() } else { i.to_string() }])
            .collect();
        let t = RawTable::new(
            vec!["label".to_string(), "value".to_string()],
            rows.iter().map(|r| r.iter().map(|c| text(c)).collect()).collect(),
        );
        let cfg = ImportConfig::default();
        let mapping = auto_map(&t.headers, &cfg);
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();

        let sequential = project_rows(&t, &mapping, &cfg, None, 64, &mut ()).unwrap();
        let pooled = project_rows(&t, &mapping, &cfg, Some(&pool), 64, &mut ()).unwrap();
        assert_eq!(sequential, pooled);
    }

    struct StopAfter(usize, usize);

    impl ParseObserver for StopAfter {
        fn on_rows(&mut self, _progress: ParseProgress) {
            self.1 += 1;
        }
        fn should_stop(&self) -> bool {
            self.1 >= self.0
        }
    }

    #[test]
    fn stop_request_abandons_projection() {
        let body: Vec<&[&str]> = (0..10).map(|_| &["a", "1"][..]).collect();
        let t = table(&["label", "value"], &body);
        let cfg = ImportConfig::default();
        let mapping = auto_map(&t.headers, &cfg);
        let mut stop = StopAfter(2, 0);
        assert!(project_rows(&t, &mapping, &cfg, None, 3, &mut stop).is_none());
        assert_eq!(stop.1, 2);
    }

    #[test]
    fn chunk_ranges_cover_all_rows() {
        assert_eq!(chunk_ranges(0, 4), Vec::<Range<usize>>::new());
        assert_eq!(chunk_ranges(10, 4), vec![0..4, 4..8, 8..10]);
    }
}
