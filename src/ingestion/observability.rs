use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::detection::FileKind;
use crate::error::ImportError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the import failed because of the file or the caller).
    Error,
    /// Critical error (I/O failures, crashed worker).
    Critical,
}

impl ImportSeverity {
    /// Classify an import failure.
    pub fn of(error: &ImportError) -> Self {
        match error {
            ImportError::Io(_) | ImportError::WorkerCrashed { .. } | ImportError::Store { .. } => {
                ImportSeverity::Critical
            }
            ImportError::ParseInProgress => ImportSeverity::Warning,
            _ => ImportSeverity::Error,
        }
    }
}

/// Context about an import attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportContext {
    /// File name as supplied by the user.
    pub file_name: String,
    /// File size in bytes.
    pub size: u64,
    /// Parser family, once the sniffer has accepted the file.
    pub kind: Option<FileKind>,
}

/// Row counts reported on a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportStats {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub duplicates: usize,
}

/// Observer interface for import outcomes.
///
/// Called once per job, from whichever thread ran it, before the terminal event is delivered.
pub trait ImportObserver: Send + Sync {
    /// Called when an import produces a report.
    fn on_success(&self, _ctx: &ImportContext, _stats: ImportStats) {}

    /// Called when an import fails.
    fn on_failure(&self, _ctx: &ImportContext, _severity: ImportSeverity, _error: &ImportError) {}

    /// Called when a failure meets the configured alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.on_failure(ctx, severity, error)
    }

    /// Called when the caller cancelled the import. Cancellation is not a failure.
    fn on_cancelled(&self, _ctx: &ImportContext) {}
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ImportObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn ImportObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl ImportObserver for CompositeObserver {
    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }

    fn on_cancelled(&self, ctx: &ImportContext) {
        for o in &self.observers {
            o.on_cancelled(ctx);
        }
    }
}

/// Emits import outcomes as `tracing` events.
///
/// Install any subscriber (e.g. `tracing-subscriber`) in the host application to see them.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ImportObserver for TracingObserver {
    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        info!(
            file = %ctx.file_name,
            size = ctx.size,
            kind = ?ctx.kind,
            total_rows = stats.total_rows,
            valid_rows = stats.valid_rows,
            invalid_rows = stats.invalid_rows,
            duplicates = stats.duplicates,
            "import succeeded"
        );
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        if severity >= ImportSeverity::Error {
            error!(file = %ctx.file_name, size = ctx.size, ?severity, %error, "import failed");
        } else {
            warn!(file = %ctx.file_name, size = ctx.size, ?severity, %error, "import failed");
        }
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        error!(
            alert = true,
            file = %ctx.file_name,
            size = ctx.size,
            kind = ?ctx.kind,
            ?severity,
            %error,
            "import alert"
        );
    }

    fn on_cancelled(&self, ctx: &ImportContext) {
        info!(file = %ctx.file_name, size = ctx.size, "import cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        calls: Mutex<Vec<&'static str>>,
    }

    impl ImportObserver for Counting {
        fn on_success(&self, _ctx: &ImportContext, _stats: ImportStats) {
            self.calls.lock().unwrap().push("success");
        }
        fn on_failure(&self, _ctx: &ImportContext, _s: ImportSeverity, _e: &ImportError) {
            self.calls.lock().unwrap().push("failure");
        }
    }

    fn ctx() -> ImportContext {
        ImportContext {
            file_name: "a.csv".to_string(),
            size: 10,
            kind: Some(FileKind::DelimitedText),
        }
    }

    #[test]
    fn severity_classification() {
        let io = ImportError::Io(std::io::Error::other("disk"));
        assert_eq!(ImportSeverity::of(&io), ImportSeverity::Critical);
        assert_eq!(ImportSeverity::of(&ImportError::EmptyBody), ImportSeverity::Error);
        assert_eq!(ImportSeverity::of(&ImportError::ParseInProgress), ImportSeverity::Warning);
        assert!(ImportSeverity::Critical > ImportSeverity::Error);
    }

    #[test]
    fn composite_fans_out_and_alert_defaults_to_failure() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let composite = CompositeObserver::new(vec![a.clone() as Arc<dyn ImportObserver>, b.clone()]);

        composite.on_success(&ctx(), ImportStats::default());
        composite.on_alert(&ctx(), ImportSeverity::Critical, &ImportError::EmptyFile);

        for o in [&a, &b] {
            assert_eq!(*o.calls.lock().unwrap(), vec!["success", "failure"]);
        }
    }
}
