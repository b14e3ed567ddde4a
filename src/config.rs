//! Import configuration.
//!
//! [`ImportConfig`] holds the static knobs of the pipeline. It deserializes from JSON with every
//! field optional, so deployments only override what they need:
//!
//! ```rust
//! use metric_import::config::ImportConfig;
//!
//! let cfg = ImportConfig::from_json_str(r#"{ "worker_threshold": 2097152 }"#).unwrap();
//! assert_eq!(cfg.worker_threshold, 2 * 1024 * 1024);
//! assert_eq!(cfg.match_threshold, 0.6);
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ACCEPTED_EXTENSIONS, DEFAULT_CONFIRM_THRESHOLD, DEFAULT_MATCH_THRESHOLD,
    DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_ROWS, DEFAULT_MAX_TEXT_LENGTH, DEFAULT_SNIFF_BYTES,
    DEFAULT_STREAMING_THRESHOLD, DEFAULT_WORKER_THRESHOLD, MAX_ROW_CHUNK, MIN_ROW_CHUNK,
};
use crate::error::{ImportError, ImportResult};

/// Which sheet of a workbook container to read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetSelection {
    /// The first sheet in workbook order (default).
    #[default]
    First,
    /// A single named sheet.
    Named(String),
}

/// Static pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Accepted extensions, lower-case, without the dot.
    pub accepted_extensions: Vec<String>,
    /// Files above this many bytes are rejected before parsing.
    pub max_file_size: u64,
    /// Per-submission row cap, enforced by [`crate::submission`].
    pub max_rows: usize,
    /// Files at or above this size are parsed on the background worker.
    pub worker_threshold: u64,
    /// Files at or above this size are read in chunks.
    pub streaming_threshold: u64,
    /// Minimum alias similarity for an automatic match.
    pub match_threshold: f64,
    /// Mapped columns scoring below this need human confirmation.
    pub confirm_threshold: f64,
    /// Free-text values are truncated to this many characters.
    pub max_text_length: usize,
    /// Leading bytes inspected for type and encoding detection.
    pub sniff_bytes: usize,
    /// Field delimiter for delimited text; `None` auto-detects.
    pub delimiter: Option<char>,
    /// Sheet to read from workbook containers.
    pub sheet: SheetSelection,
    /// Threads used by the worker to project rows. `None` uses available parallelism.
    pub worker_threads: Option<usize>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            accepted_extensions: DEFAULT_ACCEPTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_rows: DEFAULT_MAX_ROWS,
            worker_threshold: DEFAULT_WORKER_THRESHOLD,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            confirm_threshold: DEFAULT_CONFIRM_THRESHOLD,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            sniff_bytes: DEFAULT_SNIFF_BYTES,
            delimiter: None,
            sheet: SheetSelection::default(),
            worker_threads: None,
        }
    }
}

impl ImportConfig {
    /// Parse a JSON document; missing fields take their defaults. The result is validated.
    pub fn from_json_str(json: &str) -> ImportResult<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> ImportResult<()> {
        let fail = |message: String| Err(ImportError::Config { message });

        if self.accepted_extensions.is_empty() {
            return fail("accepted_extensions must not be empty".to_string());
        }
        if self.streaming_threshold < self.worker_threshold {
            return fail(format!(
                "streaming_threshold ({}) must be >= worker_threshold ({})",
                self.streaming_threshold, self.worker_threshold
            ));
        }
        for (name, v) in [
            ("match_threshold", self.match_threshold),
            ("confirm_threshold", self.confirm_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{name} must be within [0, 1] (got {v})"));
            }
        }
        if self.match_threshold > self.confirm_threshold {
            return fail(format!(
                "match_threshold ({}) must not exceed confirm_threshold ({})",
                self.match_threshold, self.confirm_threshold
            ));
        }
        if self.max_text_length == 0 {
            return fail("max_text_length must be > 0".to_string());
        }
        if self.sniff_bytes == 0 {
            return fail("sniff_bytes must be > 0".to_string());
        }
        if self.worker_threads == Some(0) {
            return fail("worker_threads must be > 0 when set".to_string());
        }
        if let Some(d) = self.delimiter {
            if !d.is_ascii() || d == '"' || d == '\n' || d == '\r' {
                return fail(format!("delimiter {d:?} must be a single ASCII separator"));
            }
        }
        Ok(())
    }

    /// Whether `extension` (any case, no dot) is accepted.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.accepted_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    /// Accepted extensions rendered for user-facing messages (`.csv, .xlsx, ...`).
    pub fn accepted_list(&self) -> String {
        self.accepted_extensions
            .iter()
            .map(|e| format!(".{}", e.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rows per projection chunk for a file of `file_size` bytes.
///
/// Pure function of size: roughly one chunk per 1% of a large file, clamped to a sane range.
pub fn recommended_chunk_size(file_size: u64) -> usize {
    // ~64 bytes per row is a typical metric export.
    let estimated_rows = (file_size / 64).max(1) as usize;
    (estimated_rows / 100).clamp(MIN_ROW_CHUNK, MAX_ROW_CHUNK)
}
