//! Phase bookkeeping and monotonic progress reporting for one import job.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ImportError, ImportResult};
use crate::ingestion::{ParseObserver, ParseProgress};
use crate::types::{ImportPhase, ProgressUpdate};

use super::ImportEvent;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

/// State shared between a job and whoever controls it.
///
/// `status` moves from running to exactly one of cancelled or finished; whichever transition
/// wins decides the terminal event.
#[derive(Debug)]
pub(crate) struct JobState {
    status: AtomicU8,
    phase: Mutex<ImportPhase>,
}

impl JobState {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(RUNNING),
            phase: Mutex::new(ImportPhase::Idle),
        }
    }

    /// Request cancellation. `false` if the job already finished or was already cancelled.
    pub(crate) fn cancel(&self) -> bool {
        self.status
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the job finished. `false` if it was cancelled first.
    pub(crate) fn finish(&self) -> bool {
        self.status
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }

    pub(crate) fn phase(&self) -> ImportPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ImportPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}

/// `(start, end)` percentage band of a phase.
pub(crate) fn band(phase: ImportPhase) -> (u8, u8) {
    match phase {
        ImportPhase::Idle | ImportPhase::Selecting => (0, 0),
        ImportPhase::ValidatingFile => (2, 2),
        ImportPhase::DetectingEncoding => (5, 5),
        ImportPhase::Parsing => (10, 60),
        ImportPhase::ValidatingRows => (60, 70),
        ImportPhase::MappingColumns => (70, 95),
        ImportPhase::Previewing | ImportPhase::Uploading => (95, 95),
        ImportPhase::Complete => (100, 100),
        ImportPhase::Error => (0, 0),
    }
}

/// Emits [`ImportEvent::Progress`] for one job.
///
/// Progress never decreases and intra-phase updates are only sent when the whole percentage
/// changes. Nothing is sent once the job is cancelled.
pub(crate) struct ProgressTracker {
    events: Sender<ImportEvent>,
    state: Arc<JobState>,
    phase: ImportPhase,
    last: u8,
    sent_any: bool,
}

impl ProgressTracker {
    pub(crate) fn new(events: Sender<ImportEvent>, state: Arc<JobState>) -> Self {
        Self {
            events,
            state,
            phase: ImportPhase::Idle,
            last: 0,
            sent_any: false,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Move to `next` and report the start of its band.
    pub(crate) fn enter(&mut self, next: ImportPhase) -> ImportResult<()> {
        self.enter_with(next, None)
    }

    pub(crate) fn enter_with(&mut self, next: ImportPhase, message: Option<String>) -> ImportResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(ImportError::InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.state.set_phase(next);
        if next != ImportPhase::Error {
            let start = band(next).0;
            self.emit(start, message, None, None, true);
        }
        Ok(())
    }

    /// Report `fraction` (`0.0..=1.0`) of the current phase.
    pub(crate) fn report(&mut self, fraction: f64, rows_processed: Option<usize>, total_rows: Option<usize>) {
        let (start, end) = band(self.phase);
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        let pct = start as f64 + (end - start) as f64 * fraction;
        self.emit(pct.floor() as u8, None, rows_processed, total_rows, false);
    }

    /// Record the `error` phase without emitting progress.
    pub(crate) fn fail(&mut self) {
        if self.phase.can_advance_to(ImportPhase::Error) {
            self.phase = ImportPhase::Error;
            self.state.set_phase(ImportPhase::Error);
        }
    }

    /// Back to `idle` after a cancelled job; partial results are gone.
    pub(crate) fn reset(&mut self) {
        self.phase = ImportPhase::Idle;
        self.state.set_phase(ImportPhase::Idle);
    }

    fn emit(
        &mut self,
        pct: u8,
        message: Option<String>,
        rows_processed: Option<usize>,
        total_rows: Option<usize>,
        phase_change: bool,
    ) {
        if self.state.is_cancelled() {
            return;
        }
        let pct = pct.max(self.last).min(100);
        if !phase_change && self.sent_any && pct == self.last {
            return;
        }
        self.last = pct;
        self.sent_any = true;
        // A dropped handle only means nobody is listening.
        let _ = self.events.send(ImportEvent::Progress(ProgressUpdate {
            phase: self.phase,
            progress: pct,
            message,
            rows_processed,
            total_rows,
        }));
    }

    /// Parse/projection observer reporting into the current phase.
    pub(crate) fn as_parse_observer(&mut self) -> PhaseProgress<'_> {
        PhaseProgress { tracker: self }
    }
}

/// Adapts a [`ProgressTracker`] to [`ParseObserver`].
pub(crate) struct PhaseProgress<'a> {
    tracker: &'a mut ProgressTracker,
}

impl ParseObserver for PhaseProgress<'_> {
    fn on_rows(&mut self, progress: ParseProgress) {
        self.tracker
            .report(progress.fraction, Some(progress.rows_read), progress.total_rows);
    }

    fn should_stop(&self) -> bool {
        self.tracker.is_cancelled()
    }
}
