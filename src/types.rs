//! Core data model for metric imports.
//!
//! Raw input is modelled as a [`RawTable`] of [`CellValue`]s. The column mapper assigns source
//! columns to [`TargetField`]s, and the validation layer projects every raw row into a
//! [`ParsedRow`], collected together with per-row [`RowIssue`]s into [`ParsedData`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single untyped scalar as extracted by the tabular parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing or blank cell.
    Empty,
    /// Numeric cell (workbook containers only; delimited text is always `Text`).
    Number(f64),
    /// Text cell.
    Text(String),
}

impl CellValue {
    /// Build a cell from delimited-text input; blank strings become [`CellValue::Empty`].
    pub fn from_text(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Self::Empty
        } else {
            Self::Text(raw.to_owned())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) => false,
        }
    }

    /// Textual rendering used for free-text fields and error messages.
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => format_number(*n),
        }
    }
}

/// Render a number without a trailing `.0` for integral values.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Header row plus raw rows, exactly as extracted from the source file.
///
/// Every row has exactly `headers.len()` cells: short rows are padded with
/// [`CellValue::Empty`] and extra trailing cells are dropped by the parser.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Canonical output columns every import maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetField {
    Label,
    Value,
    Unit,
    Type,
    Comparison,
    PreviousValue,
}

impl TargetField {
    /// All targets in declaration order. Ties during mapping resolve to the earlier entry.
    pub const ALL: [TargetField; 6] = [
        TargetField::Label,
        TargetField::Value,
        TargetField::Unit,
        TargetField::Type,
        TargetField::Comparison,
        TargetField::PreviousValue,
    ];

    /// `label` and `value` must be mapped for an import to proceed.
    pub fn is_required(self) -> bool {
        matches!(self, TargetField::Label | TargetField::Value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetField::Label => "label",
            TargetField::Value => "value",
            TargetField::Unit => "unit",
            TargetField::Type => "type",
            TargetField::Comparison => "comparison",
            TargetField::PreviousValue => "previousValue",
        }
    }
}

impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "#")]
    Count,
    #[serde(rename = "$")]
    Currency,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "People")]
    People,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Count => "#",
            Unit::Currency => "$",
            Unit::Percent => "%",
            Unit::People => "People",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Whether a metric counts activity delivered or change achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    #[default]
    Output,
    Outcome,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Output => "output",
            MetricType::Outcome => "outcome",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assignment of one source column to a target field.
///
/// `target == None` is the `unmapped` pseudo-target: the column is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub source: String,
    pub target: Option<TargetField>,
    /// Similarity score in `[0, 1]`; manual assignments are always `1.0`.
    pub confidence: f64,
    pub is_required: bool,
}

/// Output of the column mapper. `mappings[i]` describes `headers[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingResult {
    pub mappings: Vec<ColumnMapping>,
    /// Both `label` and `value` are claimed by some column.
    pub is_valid: bool,
    /// A human should confirm the mapping before the import is trusted.
    pub needs_manual_mapping: bool,
}

impl MappingResult {
    /// Column index claimed by `target`, if any.
    pub fn column_for(&self, target: TargetField) -> Option<usize> {
        self.mappings.iter().position(|m| m.target == Some(target))
    }

    /// Required targets no column claims.
    pub fn missing_required(&self) -> Vec<TargetField> {
        TargetField::ALL
            .into_iter()
            .filter(|t| t.is_required() && self.column_for(*t).is_none())
            .collect()
    }
}

/// Sanitized, type-coerced projection of one raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRow {
    pub label: String,
    /// Label cell exactly as written in the file, before sanitization.
    #[serde(skip)]
    pub source_label: String,
    /// `None` when the source value did not parse to a finite number.
    pub value: Option<f64>,
    pub unit: Unit,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Severity of a [`RowIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// A row-level error or warning.
///
/// `row` is the 1-based spreadsheet row number: the header is row 1, the first data row is 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<TargetField>,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl RowIssue {
    pub fn error(row: usize, field: TargetField, message: impl Into<String>) -> Self {
        Self {
            row,
            field: Some(field),
            severity: IssueSeverity::Error,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn warning(row: usize, field: Option<TargetField>, message: impl Into<String>) -> Self {
        Self {
            row,
            field,
            severity: IssueSeverity::Warning,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Result of one parse invocation, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedData {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub errors: Vec<RowIssue>,
}

impl ParsedData {
    pub fn error_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.severity == IssueSeverity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.severity == IssueSeverity::Warning)
            .count()
    }
}

/// A valid, deduplicated metric ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub label: String,
    pub value: f64,
    pub unit: Unit,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
}

impl MetricRecord {
    /// Typed record for a valid row; `None` for invalid rows.
    pub fn from_row(row: &ParsedRow) -> Option<Self> {
        if !row.is_valid {
            return None;
        }
        Some(Self {
            label: row.label.clone(),
            value: row.value?,
            unit: row.unit,
            metric_type: row.metric_type,
            comparison: row.comparison.clone(),
            previous_value: row.previous_value,
        })
    }
}

/// Pipeline phases, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    Selecting,
    ValidatingFile,
    DetectingEncoding,
    Parsing,
    ValidatingRows,
    MappingColumns,
    Previewing,
    Uploading,
    Complete,
    Error,
}

impl ImportPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportPhase::Complete | ImportPhase::Error)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Phases only move forward (skipping is allowed, e.g. `previewing -> complete` without an
    /// upload); `error` is reachable from any non-terminal phase; a terminal phase may only
    /// restart at `idle` or `selecting`.
    pub fn can_advance_to(self, next: ImportPhase) -> bool {
        if self.is_terminal() {
            return matches!(next, ImportPhase::Idle | ImportPhase::Selecting);
        }
        match next {
            ImportPhase::Error => true,
            ImportPhase::Idle => false,
            _ => next > self,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportPhase::Idle => "idle",
            ImportPhase::Selecting => "selecting",
            ImportPhase::ValidatingFile => "validating_file",
            ImportPhase::DetectingEncoding => "detecting_encoding",
            ImportPhase::Parsing => "parsing",
            ImportPhase::ValidatingRows => "validating_rows",
            ImportPhase::MappingColumns => "mapping_columns",
            ImportPhase::Previewing => "previewing",
            ImportPhase::Uploading => "uploading",
            ImportPhase::Complete => "complete",
            ImportPhase::Error => "error",
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub phase: ImportPhase,
    /// Overall progress, `0..=100`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
}
