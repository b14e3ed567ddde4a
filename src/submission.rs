//! Persistence boundary.
//!
//! [`submit`] is the last gate before records reach storage. It trusts nothing the parsing side
//! produced: membership, row count and every record are checked again, and text is sanitized a
//! second time before the [`MetricStore`] sees it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::error::{ImportError, ImportResult};
use crate::types::{ImportPhase, MetricRecord, ProgressUpdate};
use crate::validation::{contains_malicious_patterns, sanitize_string};

/// Storage collaborator that owns the persisted rows.
pub trait MetricStore: Send + Sync {
    /// Persist `records` under `organization_id`; returns how many were stored.
    fn insert_metrics(&self, organization_id: &str, records: Vec<MetricRecord>) -> Result<usize, String>;
}

/// Who is submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub organization_ids: Vec<String>,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, organization_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_ids: organization_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn belongs_to(&self, organization_id: &str) -> bool {
        self.organization_ids.iter().any(|o| o == organization_id)
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub organization_id: String,
    pub inserted: usize,
}

/// Re-validate `records` and hand them to `store`.
///
/// Checks, in order: the requester belongs to `organization_id`; there are `1..=max_rows`
/// records; every record has a non-blank label free of script content and finite numbers.
/// Text fields are re-sanitized before storage. `on_progress` sees `uploading` and, on success,
/// `complete`.
pub fn submit(
    requester: &Requester,
    organization_id: &str,
    records: &[MetricRecord],
    store: &dyn MetricStore,
    config: &ImportConfig,
    mut on_progress: impl FnMut(ProgressUpdate),
) -> ImportResult<SubmissionReceipt> {
    if !requester.belongs_to(organization_id) {
        warn!(user = %requester.user_id, organization = organization_id, "submission to foreign organization refused");
        return Err(ImportError::Forbidden {
            organization_id: organization_id.to_string(),
        });
    }
    if records.is_empty() || records.len() > config.max_rows {
        return Err(ImportError::RowCountOutOfRange {
            count: records.len(),
            max: config.max_rows,
        });
    }

    let clean = records
        .iter()
        .enumerate()
        .map(|(index, record)| revalidate(index, record, config.max_text_length))
        .collect::<ImportResult<Vec<_>>>()?;

    on_progress(ProgressUpdate {
        phase: ImportPhase::Uploading,
        progress: 95,
        message: Some(format!("saving {} metrics", clean.len())),
        rows_processed: None,
        total_rows: Some(clean.len()),
    });
    debug!(organization = organization_id, records = clean.len(), "storing metrics");

    let inserted = store
        .insert_metrics(organization_id, clean)
        .map_err(|message| ImportError::Store { message })?;

    info!(organization = organization_id, inserted, "metrics stored");
    on_progress(ProgressUpdate {
        phase: ImportPhase::Complete,
        progress: 100,
        message: None,
        rows_processed: Some(inserted),
        total_rows: Some(records.len()),
    });
    Ok(SubmissionReceipt {
        organization_id: organization_id.to_string(),
        inserted,
    })
}

fn revalidate(index: usize, record: &MetricRecord, max_text_length: usize) -> ImportResult<MetricRecord> {
    let reject = |reason: &str| ImportError::RejectedRow {
        index,
        reason: reason.to_string(),
    };

    let texts = std::iter::once(record.label.as_str()).chain(record.comparison.as_deref());
    for text in texts {
        if contains_malicious_patterns(text) {
            return Err(reject("contains script content"));
        }
    }

    let label = sanitize_string(&record.label, max_text_length);
    if label.is_empty() {
        return Err(reject("label is required"));
    }
    if !record.value.is_finite() {
        return Err(reject("value must be a finite number"));
    }
    if record.previous_value.is_some_and(|v| !v.is_finite()) {
        return Err(reject("previous value must be a finite number"));
    }
    let comparison = record
        .comparison
        .as_deref()
        .map(|c| sanitize_string(c, max_text_length))
        .filter(|c| !c.is_empty());

    Ok(MetricRecord {
        label,
        comparison,
        ..record.clone()
    })
}

/// [`MetricStore`] keeping records in memory, keyed by organization.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    rows: Mutex<HashMap<String, Vec<MetricRecord>>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored for `organization_id`, in insertion order.
    pub fn records(&self, organization_id: &str) -> Vec<MetricRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(organization_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricStore for InMemoryMetricStore {
    fn insert_metrics(&self, organization_id: &str, records: Vec<MetricRecord>) -> Result<usize, String> {
        let n = records.len();
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(organization_id.to_string())
            .or_default()
            .extend(records);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricType, Unit};

    fn record(label: &str, value: f64) -> MetricRecord {
        MetricRecord {
            label: label.to_string(),
            value,
            unit: Unit::Count,
            metric_type: MetricType::Output,
            comparison: None,
            previous_value: None,
        }
    }

    fn member() -> Requester {
        Requester::new("u-1", ["org-a"])
    }

    #[test]
    fn stores_records_and_reports_progress() {
        let store = InMemoryMetricStore::new();
        let mut phases = Vec::new();
        let receipt = submit(
            &member(),
            "org-a",
            &[record("  Meals   Served ", 5000.0)],
            &store,
            &ImportConfig::default(),
            |p| phases.push((p.phase, p.progress)),
        )
        .unwrap();

        assert_eq!(receipt.inserted, 1);
        assert_eq!(store.records("org-a")[0].label, "Meals Served");
        assert_eq!(phases, vec![(ImportPhase::Uploading, 95), (ImportPhase::Complete, 100)]);
    }

    #[test]
    fn foreign_organization_is_forbidden() {
        let store = InMemoryMetricStore::new();
        let err = submit(&member(), "org-b", &[record("A", 1.0)], &store, &ImportConfig::default(), |_| {})
            .unwrap_err();
        assert!(matches!(err, ImportError::Forbidden { ref organization_id } if organization_id == "org-b"));
        assert!(store.records("org-b").is_empty());
    }

    #[test]
    fn row_count_must_be_within_bounds() {
        let store = InMemoryMetricStore::new();
        let config = ImportConfig {
            max_rows: 2,
            ..Default::default()
        };
        let err = submit(&member(), "org-a", &[], &store, &config, |_| {}).unwrap_err();
        assert!(matches!(err, ImportError::RowCountOutOfRange { count: 0, max: 2 }));

        let three = [record("A", 1.0), record("B", 2.0), record("C", 3.0)];
        let err = submit(&member(), "org-a", &three, &store, &config, |_| {}).unwrap_err();
        assert!(matches!(err, ImportError::RowCountOutOfRange { count: 3, max: 2 }));
    }

    #[test]
    fn tampered_rows_are_rejected_and_nothing_is_stored() {
        let store = InMemoryMetricStore::new();
        let cfg = ImportConfig::default();

        let bad = [record("ok", 1.0), record("<script>alert(1)</script>", 2.0)];
        let err = submit(&member(), "org-a", &bad, &store, &cfg, |_| {}).unwrap_err();
        assert!(matches!(err, ImportError::RejectedRow { index: 1, .. }));

        let err = submit(&member(), "org-a", &[record("x", f64::NAN)], &store, &cfg, |_| {}).unwrap_err();
        assert!(matches!(err, ImportError::RejectedRow { index: 0, .. }));

        let err = submit(&member(), "org-a", &[record("<b></b>", 1.0)], &store, &cfg, |_| {}).unwrap_err();
        assert!(matches!(err, ImportError::RejectedRow { ref reason, .. } if reason.contains("label")));

        assert!(store.records("org-a").is_empty());
    }

    #[test]
    fn store_failures_surface_as_store_errors() {
        struct Down;
        impl MetricStore for Down {
            fn insert_metrics(&self, _: &str, _: Vec<MetricRecord>) -> Result<usize, String> {
                Err("connection refused".to_string())
            }
        }

        let mut phases = Vec::new();
        let err = submit(&member(), "org-a", &[record("A", 1.0)], &Down, &ImportConfig::default(), |p| {
            phases.push(p.phase)
        })
        .unwrap_err();
        assert!(matches!(err, ImportError::Store { ref message } if message == "connection refused"));
        assert_eq!(phases, vec![ImportPhase::Uploading]);
    }
}
