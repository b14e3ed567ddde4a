//! Row sanitization, validation and deduplication.
//!
//! - [`sanitize`]: scalar sanitizers and the malicious-content guard
//! - [`rows`]: projects raw rows through a column mapping into [`crate::types::ParsedData`]
//! - [`dedup`]: label-based deduplication into typed records

pub mod dedup;
pub mod rows;
pub mod sanitize;

pub use dedup::{collect_records, dedupe, DedupResult, RecordSet};
pub use rows::{project_row, project_rows, ColumnIndex};
pub use sanitize::{
    contains_malicious_patterns, parse_number, sanitize_number, sanitize_string, sanitize_text,
    sanitize_type, sanitize_unit,
};
