//! Tabular parsing: file bytes in, [`crate::types::RawTable`] out.
//!
//! Most callers go through [`crate::execution`], which sniffs and decodes before calling
//! [`unified::read_table`]. Format-specific parsers are also available under:
//! - [`csv`]
//! - [`excel`] (feature `excel`)
//!
//! Parsers report progress to a [`ParseObserver`] every [`REPORT_EVERY_ROWS`] rows and check
//! it for a stop request at the same cadence.

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod observability;
pub mod unified;

pub use observability::{
    CompositeObserver, ImportContext, ImportObserver, ImportSeverity, ImportStats, TracingObserver,
};
pub use unified::{read_table, FileSource, ImportFile};

/// Rows between two progress reports / cancellation checks.
pub const REPORT_EVERY_ROWS: usize = 500;

/// Progress of a single parse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseProgress {
    /// Data rows kept so far.
    pub rows_read: usize,
    /// Known once the parser has seen the whole input (or up front for workbooks).
    pub total_rows: Option<usize>,
    /// Share of the input consumed, `0.0..=1.0`.
    pub fraction: f64,
}

/// Receives parse progress and may ask the parser to stop early.
pub trait ParseObserver {
    fn on_rows(&mut self, _progress: ParseProgress) {}

    /// Checked between rows; returning `true` makes the parser return `Ok(None)`.
    fn should_stop(&self) -> bool {
        false
    }
}

impl ParseObserver for () {}

/// Drop blank header cells at the end of the header row.
pub(crate) fn trim_trailing_blank_headers(headers: &mut Vec<String>) {
    while headers.last().is_some_and(|h| h.trim().is_empty()) {
        headers.pop();
    }
}
