use metric_import::detection::TextEncoding;
use metric_import::execution::{import_file, ImportEvent, ImportOptions, ImportOrchestrator, ImportReport, ImportRequest};
use metric_import::ingestion::ImportFile;
use metric_import::types::{ImportPhase, IssueSeverity, MetricType, TargetField, Unit};
use metric_import::{ImportConfig, ImportError};

fn csv(body: &str) -> ImportFile {
    ImportFile::from_bytes("metrics.csv", body.as_bytes().to_vec())
}

fn import(file: ImportFile) -> ImportReport {
    import_file(file, ImportOptions::default())
        .unwrap()
        .into_report()
        .unwrap()
}

#[test]
fn two_line_csv_becomes_one_valid_row() {
    let report = import(csv("label,value\nMeals Served,5000"));

    assert_eq!(report.data.total_rows, 1);
    let row = &report.data.rows[0];
    assert_eq!(row.label, "Meals Served");
    assert_eq!(row.value, Some(5000.0));
    assert_eq!(row.unit, Unit::Count);
    assert_eq!(row.unit.symbol(), "#");
    assert_eq!(row.metric_type, MetricType::Output);
    assert!(row.is_valid);
    assert!(report.data.errors.is_empty());
}

#[test]
fn invalid_rows_are_reported_not_fatal() {
    let report = import(csv("label,value\n,5000\nFoo,notanumber\nBar,10"));

    assert_eq!(report.data.total_rows, 3);
    assert_eq!(report.data.valid_rows, 1);
    assert_eq!(report.data.invalid_rows, 2);
    assert_eq!(report.data.error_count(), 2);

    let errors: Vec<(usize, Option<TargetField>)> = report
        .data
        .errors
        .iter()
        .filter(|e| e.severity == IssueSeverity::Error)
        .map(|e| (e.row, e.field))
        .collect();
    assert_eq!(errors, vec![(2, Some(TargetField::Label)), (3, Some(TargetField::Value))]);

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].label, "Bar");
}

#[test]
fn descriptive_headers_map_without_confirmation() {
    let report = import(csv("Metric Name,Amount\nTrees Planted,340\n"));

    let mapping = &report.mapping;
    assert!(mapping.is_valid);
    assert!(!mapping.needs_manual_mapping);
    assert_eq!(mapping.mappings[0].target, Some(TargetField::Label));
    assert_eq!(mapping.mappings[1].target, Some(TargetField::Value));
    assert!(mapping.mappings.iter().all(|m| m.confidence >= 0.8));
}

#[test]
fn duplicate_labels_keep_the_first_row() {
    let report = import(csv("label,value\nMeals Served,1\nmeals served ,2\n"));

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].value, 1.0);
    assert_eq!(report.duplicates, vec!["meals served ".to_string()]);
    assert_eq!(report.stats().duplicates, 1);
}

#[test]
fn quarterly_export_fixture() {
    let file = ImportFile::from_path("tests/fixtures/quarterly_metrics.csv").unwrap();
    let report = import(file);

    assert_eq!(report.file_name, "quarterly_metrics.csv");
    assert_eq!(report.encoding, Some(TextEncoding::Utf8));
    let targets: Vec<Option<TargetField>> = report.mapping.mappings.iter().map(|m| m.target).collect();
    assert_eq!(
        targets,
        vec![
            Some(TargetField::Label),
            Some(TargetField::Value),
            Some(TargetField::Unit),
            Some(TargetField::Type),
            Some(TargetField::PreviousValue),
        ]
    );

    assert_eq!(report.data.total_rows, 6);
    assert_eq!(report.data.valid_rows, 4);
    assert_eq!(report.data.invalid_rows, 2);

    let labels: Vec<&str> = report.records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["Meals Served", "Volunteer Hours", "Food Insecurity Reduced"]);
    assert_eq!(report.duplicates, vec!["meals served ".to_string()]);

    let meals = &report.records[0];
    assert_eq!(meals.value, 5000.0);
    assert_eq!(meals.unit, Unit::People);
    assert_eq!(meals.previous_value, Some(4200.0));

    let hours = &report.records[1];
    assert_eq!(hours.value, 1200.0);
    assert_eq!(hours.unit, Unit::Count);
    assert_eq!(hours.metric_type, MetricType::Output);

    let food = &report.records[2];
    assert_eq!(food.unit, Unit::Percent);
    assert_eq!(food.metric_type, MetricType::Outcome);

    let rows: Vec<usize> = report.data.errors.iter().map(|e| e.row).collect();
    assert!(rows.windows(2).all(|w| w[0] <= w[1]), "issues ordered by row: {rows:?}");
}

#[test]
fn windows_1252_with_semicolons() {
    let file = ImportFile::from_path("tests/fixtures/semicolon_windows1252.csv").unwrap();
    let report = import(file);

    assert_eq!(report.encoding, Some(TextEncoding::Windows1252));
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].label, "Café Visits");
    assert_eq!(report.records[1].label, "Donations \u{2013} Q3");
    assert_eq!(report.records[1].value, 500.0);
    assert_eq!(report.records[1].unit, Unit::Currency);
}

#[test]
fn utf16_with_tabs() {
    let file = ImportFile::from_path("tests/fixtures/tab_utf16.csv").unwrap();
    let report = import(file);

    assert_eq!(report.encoding, Some(TextEncoding::Utf16Le));
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].label, "Trees Planted");
    assert_eq!(report.records[0].metric_type, MetricType::Outcome);
}

#[test]
fn streaming_and_buffered_reads_agree() {
    let mut body = String::from("label;value;unit\n");
    for i in 0..3_000 {
        body.push_str(&format!("\"Metric; {i}\";{i},5;%\n"));
    }

    let buffered = import(csv(&body));
    let streamed = import_file(
        csv(&body),
        ImportOptions {
            config: ImportConfig {
                worker_threshold: 32,
                streaming_threshold: 64,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap()
    .into_report()
    .unwrap();

    assert_eq!(buffered, streamed);
    assert_eq!(streamed.records.len(), 3_000);
    assert_eq!(streamed.records[7].label, "Metric; 7");
    assert_eq!(streamed.records[7].value, 75.0);
}

#[test]
fn disguised_executable_is_rejected() {
    let file = ImportFile::from_path("tests/fixtures/disguised_executable.xlsx").unwrap();
    let err = import_file(file, ImportOptions::default()).unwrap_err();
    assert!(matches!(err, ImportError::DisallowedContent { .. }));
    assert!(err.is_file_rejection());
}

#[test]
fn declared_type_mismatch_is_reported_as_a_header_warning() {
    let file = csv("label,value\nMeals Served,5000\n").with_declared_mime("image/png");
    let report = import(file);

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.data.warning_count(), 1);
    let issue = &report.data.errors[0];
    assert_eq!(issue.row, 1);
    assert_eq!(issue.severity, IssueSeverity::Warning);
    assert!(issue.message.contains("declared type 'image/png'"), "{}", issue.message);
}

#[test]
fn header_starting_with_mz_is_still_a_csv() {
    let request = ImportRequest::new(csv("MZ Region,value\nNorth,3\n"))
        .with_manual_mapping([("MZ Region", TargetField::Label), ("value", TargetField::Value)]);
    let report = ImportOrchestrator::new(ImportOptions::default())
        .unwrap()
        .import(request)
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].label, "North");
    assert!(report.data.errors.is_empty());
}

#[test]
fn unsupported_extension_is_rejected() {
    let file = ImportFile::from_bytes("notes.txt", b"label,value\nA,1\n".to_vec());
    let err = import_file(file, ImportOptions::default()).unwrap_err();
    assert!(matches!(err, ImportError::UnsupportedExtension { .. }));
}

#[test]
fn missing_required_columns_name_the_targets() {
    let err = import_file(csv("Description,Notes\nfoo,bar\n"), ImportOptions::default()).unwrap_err();
    match err {
        ImportError::MissingRequiredColumns { missing, headers } => {
            assert_eq!(missing, vec![TargetField::Label, TargetField::Value]);
            assert_eq!(headers, vec!["Description", "Notes"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn progress_runs_through_every_phase_in_order() {
    let orchestrator = ImportOrchestrator::new(ImportOptions::default()).unwrap();
    let mut updates = Vec::new();
    let outcome = orchestrator
        .start(ImportRequest::new(csv("label,value\nA,1\nB,2\n")))
        .unwrap()
        .wait_with(|p| updates.push((p.phase, p.progress)))
        .unwrap();
    assert!(!outcome.is_cancelled());

    let phases: Vec<ImportPhase> = updates.iter().map(|(phase, _)| *phase).collect();
    for phase in [
        ImportPhase::Selecting,
        ImportPhase::ValidatingFile,
        ImportPhase::DetectingEncoding,
        ImportPhase::Parsing,
        ImportPhase::ValidatingRows,
        ImportPhase::MappingColumns,
        ImportPhase::Previewing,
        ImportPhase::Complete,
    ] {
        assert!(phases.contains(&phase), "missing {phase}");
    }
    assert!(phases.windows(2).all(|w| w[0] <= w[1]));
    assert!(updates.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(updates.last(), Some(&(ImportPhase::Complete, 100)));
}

#[test]
fn cancelling_a_large_import_never_delivers_a_result() {
    let mut body = String::from("label,value\n");
    for i in 0..40_000 {
        body.push_str(&format!("metric {i},{i}\n"));
    }
    let orchestrator = ImportOrchestrator::new(ImportOptions {
        config: ImportConfig {
            worker_threshold: 1,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();

    let handle = orchestrator.start(ImportRequest::new(csv(&body))).unwrap();
    if handle.cancel() {
        let events: Vec<ImportEvent> = handle.collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ImportEvent::Cancelled));
    } else {
        let last = handle.last();
        assert!(matches!(last, Some(ImportEvent::Completed(_))));
    }

    let again = orchestrator.import(ImportRequest::new(csv("label,value\nA,1\n"))).unwrap();
    assert_eq!(again.into_report().unwrap().records.len(), 1);
}
