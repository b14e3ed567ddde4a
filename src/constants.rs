//! Named defaults and static lookup tables.
//!
//! Everything here is static configuration: size ceilings, offload thresholds, the
//! column-mapping confidence thresholds and the alias tables used to recognise headers and
//! cell values. Runtime-tunable copies of the numeric values live on
//! [`crate::config::ImportConfig`].

// =============================================================================
// File acceptance
// =============================================================================

/// Extensions accepted by default (lower-case, without the leading dot).
pub const DEFAULT_ACCEPTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "ods"];

/// Files larger than this are rejected before any parsing starts.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Caller-level cap on rows per submission (enforced at the submission boundary only).
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// Number of leading bytes inspected by the byte sniffer and the encoding detector.
pub const DEFAULT_SNIFF_BYTES: usize = 4096;

// =============================================================================
// Execution strategy
// =============================================================================

/// Files at or above this size are parsed on the background worker.
pub const DEFAULT_WORKER_THRESHOLD: u64 = 1024 * 1024;

/// Files at or above this size are read in chunks instead of as a whole buffer.
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Rows projected per chunk when the table is large enough to be split.
pub const MIN_ROW_CHUNK: usize = 256;
pub const MAX_ROW_CHUNK: usize = 8_192;

/// Bytes read per chunk by the streaming decoder.
pub const STREAM_READ_CHUNK: usize = 64 * 1024;

// =============================================================================
// Column mapping
// =============================================================================

/// Minimum alias similarity for a header to be matched to a target at all.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Mapped columns below this confidence must be confirmed by a human.
pub const DEFAULT_CONFIRM_THRESHOLD: f64 = 0.8;

/// Score for a header that contains (or is contained in) an alias.
pub const SUBSTRING_SCORE: f64 = 0.9;

/// Header aliases per target field, lower-case.
pub mod header_aliases {
    pub const LABEL: &[&str] = &[
        "label",
        "metric",
        "metric name",
        "name",
        "indicator",
        "measure",
        "title",
        "kpi",
    ];
    pub const VALUE: &[&str] = &["value", "amount", "count", "total", "number", "quantity", "sum"];
    pub const UNIT: &[&str] = &["unit", "units", "unit of measure", "uom", "measurement unit"];
    pub const TYPE: &[&str] = &["type", "metric type", "category", "kind", "classification"];
    pub const COMPARISON: &[&str] = &["comparison", "compare", "benchmark", "baseline", "goal", "target"];
    pub const PREVIOUS_VALUE: &[&str] = &[
        "previous value",
        "previous",
        "prior value",
        "prior",
        "last year",
        "previous year",
        "last period",
    ];
}

// =============================================================================
// Row sanitization
// =============================================================================

/// Free-text values are truncated to this many characters.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 1000;

/// Symbols stripped from numeric cells before parsing.
pub const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩', '¢'];

/// Cell-value aliases for the `unit` field, lower-case.
pub mod unit_aliases {
    pub const COUNT: &[&str] = &["#", "count", "number", "num", "no", "qty", "quantity"];
    pub const CURRENCY: &[&str] = &["$", "dollars", "dollar", "usd", "currency", "money"];
    pub const PERCENT: &[&str] = &["%", "percent", "percentage", "pct", "per cent"];
    pub const PEOPLE: &[&str] = &[
        "people",
        "person",
        "persons",
        "individuals",
        "individual",
        "participants",
        "clients",
        "beneficiaries",
    ];
}

/// Cell-value aliases for the `type` field, lower-case.
pub mod type_aliases {
    pub const OUTPUT: &[&str] = &["output", "outputs", "activity", "service", "deliverable"];
    pub const OUTCOME: &[&str] = &["outcome", "outcomes", "impact", "result", "effect"];
}
