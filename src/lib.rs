//! `metric-import` turns user-uploaded spreadsheets of impact metrics into validated, typed
//! records.
//!
//! A file goes through a fixed pipeline:
//!
//! 1. **Byte sniffing** ([`detection::sniff`]): the declared extension must be accepted and agree
//!    with the leading bytes; executables, PDFs, images and archives posing as spreadsheets are
//!    rejected.
//! 2. **Encoding detection** ([`detection::encoding`]): UTF-8/16/32 byte-order marks, then UTF-8
//!    and a Windows-1252 fallback, normalized to UTF-8 text with `\n` line endings.
//! 3. **Parsing** ([`ingestion`]): delimited text (with delimiter detection) or a workbook
//!    container (`.xlsx`, `.xls`, `.ods`; Cargo feature `excel`) into a [`types::RawTable`].
//! 4. **Column mapping** ([`mapping`]): headers are fuzzy-matched to the target fields `label`,
//!    `value`, `unit`, `type`, `comparison` and `previous_value`.
//! 5. **Sanitizing and validation** ([`validation`]): markup and script vectors are stripped,
//!    numbers are parsed, units and types normalized; problems become [`types::RowIssue`]s.
//! 6. **Deduplication** ([`validation::dedup`]): the first row per label wins.
//!
//! [`execution::ImportOrchestrator`] runs the pipeline, inline for small files and on a
//! background worker for large ones, and reports progress and cancellation through an
//! [`execution::ImportHandle`]. [`submission::submit`] is the persistence boundary.
//!
//! ## Quick example
//!
//! ```rust
//! use metric_import::execution::{import_file, ImportOptions};
//! use metric_import::ingestion::ImportFile;
//! use metric_import::types::Unit;
//!
//! # fn main() -> Result<(), metric_import::ImportError> {
//! let csv = "Metric Name,Amount,Unit\nMeals Served,\"5,000\",people\nVolunteers,42,\n";
//! let file = ImportFile::from_bytes("q3.csv", csv.as_bytes().to_vec());
//!
//! let report = import_file(file, ImportOptions::default())?
//!     .into_report()
//!     .expect("not cancelled");
//! assert_eq!(report.records.len(), 2);
//! assert_eq!(report.records[0].value, 5000.0);
//! assert_eq!(report.records[0].unit, Unit::People);
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress and cancellation
//!
//! ```no_run
//! use metric_import::execution::{ImportEvent, ImportOptions, ImportOrchestrator, ImportRequest};
//! use metric_import::ingestion::ImportFile;
//!
//! # fn main() -> Result<(), metric_import::ImportError> {
//! let orchestrator = ImportOrchestrator::new(ImportOptions::default())?;
//! let file = ImportFile::from_path("large-export.csv")?;
//! let mut handle = orchestrator.start(ImportRequest::new(file))?;
//!
//! while let Some(event) = handle.recv() {
//!     match event {
//!         ImportEvent::Progress(p) => println!("{} {}%", p.phase, p.progress),
//!         ImportEvent::Completed(report) => println!("{} records", report.records.len()),
//!         ImportEvent::Failed(err) => eprintln!("import failed: {err}"),
//!         ImportEvent::Cancelled => println!("cancelled"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: [`config::ImportConfig`] and its validation
//! - [`constants`]: named defaults and alias tables
//! - [`detection`]: byte sniffing and text encoding
//! - [`ingestion`]: CSV/workbook parsing and import observers
//! - [`mapping`]: header to target-field mapping
//! - [`validation`]: sanitizers, row projection, deduplication
//! - [`execution`]: the orchestrator, progress events and the background worker
//! - [`submission`]: re-validation before persistence
//! - [`types`]: data passed between stages
//! - [`error`]: [`ImportError`]

pub mod config;
pub mod constants;
pub mod detection;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod mapping;
pub mod submission;
pub mod types;
pub mod validation;

pub use config::ImportConfig;
pub use error::{ImportError, ImportResult};
pub use execution::{
    import_file, ImportEvent, ImportHandle, ImportOptions, ImportOrchestrator, ImportOutcome,
    ImportReport, ImportRequest,
};
