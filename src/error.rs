use thiserror::Error;

use crate::types::{ImportPhase, TargetField};

/// Convenience result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Error type returned by import functions.
///
/// Row-level problems are not errors: they are reported as [`crate::types::RowIssue`]s inside
/// [`crate::types::ParsedData`]. Cancellation is not an error either; see
/// [`crate::execution::ImportOutcome::Cancelled`].
#[derive(Debug, Error)]
pub enum ImportError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited-text parse error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    /// Workbook container error (feature-gated behind `excel`).
    #[error("spreadsheet error: {0}")]
    Excel(#[from] calamine::Error),

    /// The file name has no extension.
    #[error("file '{file_name}' has no extension")]
    MissingExtension { file_name: String },

    /// The extension is not in the accepted list.
    #[error("unsupported file type '.{extension}'. accepted: {accepted}")]
    UnsupportedExtension { extension: String, accepted: String },

    /// A non-CSV extension whose content matched no known signature.
    #[error("could not detect file type for '.{extension}' file")]
    UndetectedFileType { extension: String },

    /// The content signature belongs to a format that is not accepted.
    #[error("file content looks like {detected}, which is not an accepted spreadsheet format")]
    DisallowedContent { detected: String },

    /// Zero-byte file.
    #[error("file is empty")]
    EmptyFile,

    /// File above the configured size ceiling.
    #[error("file is too large: {size} bytes (maximum is {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    /// The first row contains no usable header cells.
    #[error("file has no header row")]
    NoHeaders,

    /// The requested workbook sheet does not exist.
    #[error("sheet '{name}' not found. sheets={available:?}")]
    SheetNotFound { name: String, available: Vec<String> },

    /// Headers are present but there are no data rows.
    #[error("file has no data rows")]
    EmptyBody,

    /// No column satisfies a required target, even after fuzzy mapping.
    #[error("missing required columns: {}. headers={headers:?}", join_targets(.missing))]
    MissingRequiredColumns {
        missing: Vec<TargetField>,
        headers: Vec<String>,
    },

    /// A second import was started while one is in flight.
    #[error("parsing already in progress")]
    ParseInProgress,

    /// An internal phase transition broke the pipeline ordering.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: ImportPhase, to: ImportPhase },

    /// The background worker panicked or disappeared mid-job.
    #[error("background worker crashed: {message}")]
    WorkerCrashed { message: String },

    /// The requester does not belong to the target organization.
    #[error("requester is not a member of organization '{organization_id}'")]
    Forbidden { organization_id: String },

    /// Submission row count outside `1..=max`.
    #[error("submission must contain between 1 and {max} rows (got {count})")]
    RowCountOutOfRange { count: usize, max: usize },

    /// A submitted row failed server-side re-validation.
    #[error("row {index} rejected: {reason}")]
    RejectedRow { index: usize, reason: String },

    /// The persistence collaborator failed.
    #[error("store error: {message}")]
    Store { message: String },

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Configuration could not be deserialized.
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl ImportError {
    /// Errors that reject the file before any row is read.
    pub fn is_file_rejection(&self) -> bool {
        matches!(
            self,
            ImportError::MissingExtension { .. }
                | ImportError::UnsupportedExtension { .. }
                | ImportError::UndetectedFileType { .. }
                | ImportError::DisallowedContent { .. }
                | ImportError::EmptyFile
                | ImportError::FileTooLarge { .. }
        )
    }

    /// Errors caused by the shape of an otherwise readable file.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ImportError::NoHeaders
                | ImportError::EmptyBody
                | ImportError::SheetNotFound { .. }
                | ImportError::MissingRequiredColumns { .. }
        )
    }
}

fn join_targets(targets: &[TargetField]) -> String {
    targets
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
