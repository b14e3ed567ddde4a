//! Parsing orchestrator.
//!
//! [`ImportOrchestrator`] drives one file through the pipeline phases
//! (`selecting -> validating_file -> detecting_encoding -> parsing -> validating_rows ->
//! mapping_columns -> previewing -> complete`) and reports progress as [`ImportEvent`]s on an
//! [`ImportHandle`].
//!
//! - Files below [`ImportConfig::worker_threshold`] run inline on the calling thread; their
//!   events are buffered on the handle.
//! - Larger files are moved to a background worker thread owned by the orchestrator. The worker
//!   is created on first use and joined when the orchestrator is dropped.
//! - Only one import may be in flight per orchestrator; a second `start` fails fast with
//!   [`ImportError::ParseInProgress`].
//! - Cancellation is cooperative: the job checks its flag between rows and chunks. After a
//!   successful cancel the handle yields a single [`ImportEvent::Cancelled`] and nothing else.
//!
//! ```rust
//! use metric_import::execution::{ImportOptions, ImportOrchestrator, ImportOutcome, ImportRequest};
//! use metric_import::ingestion::ImportFile;
//!
//! # fn main() -> Result<(), metric_import::ImportError> {
//! let orchestrator = ImportOrchestrator::new(ImportOptions::default())?;
//! let file = ImportFile::from_bytes("metrics.csv", b"label,value\nMeals Served,5000\n".to_vec());
//!
//! match orchestrator.import(ImportRequest::new(file))? {
//!     ImportOutcome::Completed(report) => assert_eq!(report.records.len(), 1),
//!     ImportOutcome::Cancelled => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

mod progress;
mod worker;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::config::{recommended_chunk_size, ImportConfig};
use crate::detection::{check_file, detect_encoding, FileKind, TextEncoding};
use crate::error::{ImportError, ImportResult};
use crate::ingestion::{read_table, ImportContext, ImportFile, ImportObserver, ImportSeverity, ImportStats};
use crate::mapping::{auto_map, manual_mapping, HEADER_ROW};
use crate::types::{ImportPhase, MappingResult, MetricRecord, ParsedData, ProgressUpdate, RowIssue, TargetField};
use crate::validation::{collect_records, project_rows, RecordSet};

use progress::{JobState, ProgressTracker};
use worker::Worker;

/// One file to import, plus an optional manual column mapping.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    file: ImportFile,
    assignments: Option<Vec<(String, TargetField)>>,
}

impl ImportRequest {
    pub fn new(file: ImportFile) -> Self {
        Self {
            file,
            assignments: None,
        }
    }

    /// Skip automatic mapping and use these `(source header, target)` assignments instead.
    pub fn with_manual_mapping<S: Into<String>>(
        mut self,
        assignments: impl IntoIterator<Item = (S, TargetField)>,
    ) -> Self {
        self.assignments = Some(
            assignments
                .into_iter()
                .map(|(source, target)| (source.into(), target))
                .collect(),
        );
        self
    }

    pub fn file(&self) -> &ImportFile {
        &self.file
    }
}

/// Per-orchestrator options.
#[derive(Clone)]
pub struct ImportOptions {
    pub config: ImportConfig,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn ImportObserver>>,
    /// Severity threshold at which `on_alert` is invoked instead of `on_failure`.
    pub alert_at_or_above: ImportSeverity,
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("config", &self.config)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            config: ImportConfig::default(),
            observer: None,
            alert_at_or_above: ImportSeverity::Critical,
        }
    }
}

/// Everything a successful import produced, ready for preview.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub file_name: String,
    pub kind: FileKind,
    /// Detected text encoding; `None` for workbook containers.
    pub encoding: Option<TextEncoding>,
    pub mapping: MappingResult,
    /// Every row with its validation result, plus row-level errors and warnings.
    pub data: ParsedData,
    /// Valid rows after deduplication.
    pub records: Vec<MetricRecord>,
    /// Original labels of rows dropped as duplicates.
    pub duplicates: Vec<String>,
}

impl ImportReport {
    pub fn stats(&self) -> ImportStats {
        ImportStats {
            total_rows: self.data.total_rows,
            valid_rows: self.data.valid_rows,
            invalid_rows: self.data.invalid_rows,
            duplicates: self.duplicates.len(),
        }
    }
}

/// A message from a running import.
#[derive(Debug)]
pub enum ImportEvent {
    Progress(ProgressUpdate),
    Completed(ImportReport),
    Failed(ImportError),
    Cancelled,
}

impl ImportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImportEvent::Progress(_))
    }
}

/// How a finished import ended, when it did not fail.
#[derive(Debug)]
pub enum ImportOutcome {
    Completed(ImportReport),
    Cancelled,
}

impl ImportOutcome {
    pub fn into_report(self) -> Option<ImportReport> {
        match self {
            ImportOutcome::Completed(report) => Some(report),
            ImportOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportOutcome::Cancelled)
    }
}

/// Receiving end of one import.
///
/// Yields progress events in non-decreasing order followed by exactly one terminal event, then
/// `None`. Also usable as an iterator.
pub struct ImportHandle {
    events: Receiver<ImportEvent>,
    state: Arc<JobState>,
    done: bool,
}

impl ImportHandle {
    /// Block until the next event.
    pub fn recv(&mut self) -> Option<ImportEvent> {
        if self.done {
            return None;
        }
        loop {
            match self.events.recv() {
                Ok(ImportEvent::Progress(update)) => {
                    if self.state.is_cancelled() {
                        continue;
                    }
                    return Some(ImportEvent::Progress(update));
                }
                Ok(event) => {
                    self.done = true;
                    if self.state.is_cancelled() {
                        return Some(ImportEvent::Cancelled);
                    }
                    return Some(event);
                }
                Err(mpsc::RecvError) => {
                    self.done = true;
                    if self.state.is_cancelled() {
                        return Some(ImportEvent::Cancelled);
                    }
                    return Some(ImportEvent::Failed(ImportError::WorkerCrashed {
                        message: "worker stopped before reporting a result".to_string(),
                    }));
                }
            }
        }
    }

    /// Ask the job to stop. Returns `false` (and does nothing) if it already ended or was
    /// already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.cancel();
        if cancelled {
            debug!("import cancellation requested");
        }
        cancelled
    }

    /// Current phase of the job.
    pub fn phase(&self) -> ImportPhase {
        self.state.phase()
    }

    /// Drain events until the terminal one.
    pub fn wait(self) -> ImportResult<ImportOutcome> {
        self.wait_with(|_| {})
    }

    /// Like [`Self::wait`], passing each progress update to `on_progress`.
    pub fn wait_with(mut self, mut on_progress: impl FnMut(&ProgressUpdate)) -> ImportResult<ImportOutcome> {
        while let Some(event) = self.recv() {
            match event {
                ImportEvent::Progress(update) => on_progress(&update),
                ImportEvent::Completed(report) => return Ok(ImportOutcome::Completed(report)),
                ImportEvent::Failed(error) => return Err(error),
                ImportEvent::Cancelled => return Ok(ImportOutcome::Cancelled),
            }
        }
        Err(ImportError::WorkerCrashed {
            message: "import handle already drained".to_string(),
        })
    }
}

impl Iterator for ImportHandle {
    type Item = ImportEvent;

    fn next(&mut self) -> Option<ImportEvent> {
        self.recv()
    }
}

impl fmt::Debug for ImportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportHandle")
            .field("phase", &self.state.phase())
            .field("done", &self.done)
            .finish()
    }
}

/// Runs imports, one at a time.
pub struct ImportOrchestrator {
    options: Arc<ImportOptions>,
    busy: Arc<AtomicBool>,
    current: Mutex<Option<Arc<JobState>>>,
    worker: Mutex<Option<Worker>>,
}

impl ImportOrchestrator {
    /// Create an orchestrator. The configuration is validated here.
    pub fn new(options: ImportOptions) -> ImportResult<Self> {
        options.config.validate()?;
        Ok(Self {
            options: Arc::new(options),
            busy: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Start importing `request`.
    ///
    /// Small files are fully processed before this returns; large files are handed to the
    /// background worker. Fails with [`ImportError::ParseInProgress`] while another import
    /// started here has not finished.
    pub fn start(&self, request: ImportRequest) -> ImportResult<ImportHandle> {
        let guard = InFlightGuard::acquire(&self.busy).ok_or(ImportError::ParseInProgress)?;

        let state = Arc::new(JobState::new());
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&state));

        let (tx, rx) = mpsc::channel();
        let offload = request.file.size() >= self.options.config.worker_threshold;
        let job = Job {
            request,
            options: Arc::clone(&self.options),
            state: Arc::clone(&state),
            events: tx,
            guard,
        };

        if offload {
            debug!(file = job.request.file.name(), size = job.request.file.size(), "offloading import");
            self.dispatch(job);
        } else {
            debug!(file = job.request.file.name(), size = job.request.file.size(), "importing inline");
            job.run(None);
        }

        Ok(ImportHandle {
            events: rx,
            state,
            done: false,
        })
    }

    /// Start and wait for the result.
    pub fn import(&self, request: ImportRequest) -> ImportResult<ImportOutcome> {
        self.start(request)?.wait()
    }

    /// Cancel the in-flight import, if any. Safe to call at any time.
    pub fn cancel(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|state| state.cancel())
    }

    /// Phase of the most recent import, or `idle` before the first one.
    pub fn phase(&self) -> ImportPhase {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(ImportPhase::Idle, |state| state.phase())
    }

    /// Whether an import is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn dispatch(&self, job: Job) {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let threads = self.options.config.worker_threads;

        let mut job = job;
        for attempt in 0..2 {
            if slot.is_none() {
                match Worker::spawn(threads) {
                    Ok(w) => *slot = Some(w),
                    Err(e) => return job.reject(e),
                }
            }
            let Some(worker) = slot.as_ref() else {
                break;
            };
            match worker.submit(job) {
                Ok(()) => return,
                Err(returned) => {
                    warn!(attempt, "import worker is gone; restarting it");
                    job = returned;
                    *slot = None;
                }
            }
        }
        job.reject(ImportError::WorkerCrashed {
            message: "could not hand the import to a worker".to_string(),
        });
    }
}

impl fmt::Debug for ImportOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOrchestrator")
            .field("options", &self.options)
            .field("busy", &self.is_busy())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Drop for ImportOrchestrator {
    fn drop(&mut self) {
        // The worker is joined when its field drops; stop the running job first.
        self.cancel();
    }
}

/// Import a single file with a throwaway orchestrator.
pub fn import_file(file: ImportFile, options: ImportOptions) -> ImportResult<ImportOutcome> {
    ImportOrchestrator::new(options)?.import(ImportRequest::new(file))
}

/// Marks an orchestrator busy until dropped.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A request bundled with everything needed to run it on any thread.
pub(crate) struct Job {
    request: ImportRequest,
    options: Arc<ImportOptions>,
    state: Arc<JobState>,
    events: Sender<ImportEvent>,
    guard: InFlightGuard,
}

impl Job {
    pub(crate) fn run(self, pool: Option<&ThreadPool>) {
        let Job {
            request,
            options,
            state,
            events,
            guard,
        } = self;
        let mut ctx = ImportContext {
            file_name: request.file.name().to_string(),
            size: request.file.size(),
            kind: None,
        };
        let mut tracker = ProgressTracker::new(events.clone(), Arc::clone(&state));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            execute(request, &options.config, &mut tracker, &mut ctx, pool)
        }))
        .unwrap_or_else(|payload| {
            Err(ImportError::WorkerCrashed {
                message: panic_message(payload.as_ref()),
            })
        });

        finalize(result, &options, &state, &mut tracker, &ctx, guard, &events);
    }

    fn reject(self, error: ImportError) {
        let ctx = ImportContext {
            file_name: self.request.file.name().to_string(),
            size: self.request.file.size(),
            kind: None,
        };
        let mut tracker = ProgressTracker::new(self.events.clone(), Arc::clone(&self.state));
        finalize(
            Err(error),
            &self.options,
            &self.state,
            &mut tracker,
            &ctx,
            self.guard,
            &self.events,
        );
    }
}

fn execute(
    request: ImportRequest,
    config: &ImportConfig,
    tracker: &mut ProgressTracker,
    ctx: &mut ImportContext,
    pool: Option<&ThreadPool>,
) -> ImportResult<Option<ImportReport>> {
    let ImportRequest { file, assignments } = request;

    tracker.enter(ImportPhase::Selecting)?;
    tracker.enter(ImportPhase::ValidatingFile)?;
    let size = file.size();
    if size == 0 {
        return Err(ImportError::EmptyFile);
    }
    if size > config.max_file_size {
        return Err(ImportError::FileTooLarge {
            size,
            max: config.max_file_size,
        });
    }
    let prefix = file.read_prefix(config.sniff_bytes)?;
    let check = check_file(file.name(), &prefix, file.declared_mime(), config)?;
    let kind = check.kind;
    ctx.kind = Some(kind);
    for warning in &check.warnings {
        warn!(file = %ctx.file_name, "{warning}");
    }

    tracker.enter(ImportPhase::DetectingEncoding)?;
    let encoding = match kind {
        FileKind::DelimitedText => Some(detect_encoding(&prefix)),
        FileKind::Workbook => None,
    };
    if tracker.is_cancelled() {
        return Ok(None);
    }

    let streaming = kind == FileKind::DelimitedText && size >= config.streaming_threshold;
    tracker.enter_with(
        ImportPhase::Parsing,
        Some(if streaming { "reading file in chunks" } else { "reading file" }.to_string()),
    )?;
    debug!(file = %ctx.file_name, ?kind, ?encoding, streaming, "parsing");

    let file_name = file.name().to_string();
    let table = {
        let mut observer = tracker.as_parse_observer();
        read_table(file, kind, encoding.unwrap_or(TextEncoding::Utf8), config, &mut observer)?
    };
    let Some(table) = table else {
        return Ok(None);
    };

    tracker.enter(ImportPhase::ValidatingRows)?;
    if table.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ImportError::NoHeaders);
    }
    if table.rows.is_empty() {
        return Err(ImportError::EmptyBody);
    }

    tracker.enter(ImportPhase::MappingColumns)?;
    let mapping = match &assignments {
        Some(assignments) => manual_mapping(&table.headers, assignments),
        None => auto_map(&table.headers, config),
    };
    if !mapping.is_valid {
        return Err(ImportError::MissingRequiredColumns {
            missing: mapping.missing_required(),
            headers: table.headers.clone(),
        });
    }

    let chunk_size = recommended_chunk_size(size);
    let data = {
        let mut observer = tracker.as_parse_observer();
        project_rows(&table, &mapping, config, pool, chunk_size, &mut observer)
    };
    let Some(mut data) = data else {
        return Ok(None);
    };
    data.errors.splice(
        0..0,
        check
            .warnings
            .into_iter()
            .map(|w| RowIssue::warning(HEADER_ROW, None, w)),
    );
    let RecordSet {
        records,
        duplicates,
    } = collect_records(&mut data);

    tracker.enter_with(
        ImportPhase::Previewing,
        Some(format!("{} of {} rows valid", data.valid_rows, data.total_rows)),
    )?;

    Ok(Some(ImportReport {
        file_name,
        kind,
        encoding,
        mapping,
        data,
        records,
        duplicates,
    }))
}

/// Report the outcome to the observer, release the orchestrator, then send the terminal event.
fn finalize(
    result: ImportResult<Option<ImportReport>>,
    options: &ImportOptions,
    state: &JobState,
    tracker: &mut ProgressTracker,
    ctx: &ImportContext,
    guard: InFlightGuard,
    events: &Sender<ImportEvent>,
) {
    let observer = options.observer.as_deref();
    let finished = state.finish();

    let event = match result {
        Ok(Some(report)) if finished => {
            let _ = tracker.enter(ImportPhase::Complete);
            let stats = report.stats();
            info!(
                file = %ctx.file_name,
                rows = stats.total_rows,
                valid = stats.valid_rows,
                duplicates = stats.duplicates,
                "import complete"
            );
            if let Some(o) = observer {
                o.on_success(ctx, stats);
            }
            ImportEvent::Completed(report)
        }
        Err(error) if finished => {
            tracker.fail();
            let severity = ImportSeverity::of(&error);
            if let Some(o) = observer {
                if severity >= options.alert_at_or_above {
                    o.on_alert(ctx, severity, &error);
                } else {
                    o.on_failure(ctx, severity, &error);
                }
            }
            ImportEvent::Failed(error)
        }
        // Cancelled, or a stop request ended the job without a result.
        _ => {
            tracker.reset();
            debug!(file = %ctx.file_name, "import cancelled");
            if let Some(o) = observer {
                o.on_cancelled(ctx);
            }
            ImportEvent::Cancelled
        }
    };

    drop(guard);
    let _ = events.send(event);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
