use metric_import::execution::{import_file, ImportOptions};
use metric_import::ingestion::ImportFile;
use metric_import::submission::{submit, InMemoryMetricStore, Requester};
use metric_import::types::{ImportPhase, MetricRecord, MetricType, Unit};
use metric_import::{ImportConfig, ImportError};

fn records_from(csv: &str) -> Vec<MetricRecord> {
    let file = ImportFile::from_bytes("m.csv", csv.as_bytes().to_vec());
    import_file(file, ImportOptions::default())
        .unwrap()
        .into_report()
        .unwrap()
        .records
}

#[test]
fn imported_records_pass_the_submission_guard() {
    let records = records_from("label,value,unit\n<b>Meals</b> Served,5000,people\nVolunteers,42,\n");
    assert_eq!(records[0].label, "Meals Served");

    let store = InMemoryMetricStore::new();
    let requester = Requester::new("user-7", ["org-1", "org-2"]);
    let mut phases = Vec::new();
    let receipt = submit(&requester, "org-2", &records, &store, &ImportConfig::default(), |p| {
        phases.push(p.phase)
    })
    .unwrap();

    assert_eq!(receipt.inserted, 2);
    assert_eq!(receipt.organization_id, "org-2");
    assert_eq!(phases, vec![ImportPhase::Uploading, ImportPhase::Complete]);
    assert_eq!(store.records("org-2"), records);
    assert!(store.records("org-1").is_empty());
}

#[test]
fn payloads_edited_after_parsing_are_rejected() {
    let mut records = records_from("label,value\nA,1\nB,2\n");
    records[1].comparison = Some("javascript:alert(1)".to_string());

    let store = InMemoryMetricStore::new();
    let requester = Requester::new("user-7", ["org-1"]);
    let err = submit(&requester, "org-1", &records, &store, &ImportConfig::default(), |_| {}).unwrap_err();
    assert!(matches!(err, ImportError::RejectedRow { index: 1, .. }));
    assert!(store.records("org-1").is_empty());
}

#[test]
fn cap_applies_at_submission_not_at_parse() {
    let mut body = String::from("label,value\n");
    for i in 0..5 {
        body.push_str(&format!("m{i},{i}\n"));
    }
    let records = records_from(&body);
    assert_eq!(records.len(), 5);

    let config = ImportConfig {
        max_rows: 4,
        ..Default::default()
    };
    let store = InMemoryMetricStore::new();
    let requester = Requester::new("user-7", ["org-1"]);
    let err = submit(&requester, "org-1", &records, &store, &config, |_| {}).unwrap_err();
    assert!(matches!(err, ImportError::RowCountOutOfRange { count: 5, max: 4 }));

    let receipt = submit(&requester, "org-1", &records[..4], &store, &config, |_| {}).unwrap();
    assert_eq!(receipt.inserted, 4);
    let stored = store.records("org-1");
    assert!(stored.iter().all(|r| r.unit == Unit::Count && r.metric_type == MetricType::Output));
}
