#![cfg(feature = "excel_test_writer")]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use metric_import::config::SheetSelection;
use metric_import::detection::FileKind;
use metric_import::execution::{import_file, ImportOptions};
use metric_import::ingestion::ImportFile;
use metric_import::types::{IssueSeverity, MetricType, TargetField, Unit};
use metric_import::{ImportConfig, ImportError};

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("metric-import-{name}-{nanos}.xlsx"))
}

/// Two sheets: "Summary" with a title row above the headers, "Raw" with plain headers.
fn write_metrics_xlsx(path: &PathBuf) {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();

    let ws = wb.add_worksheet();
    ws.set_name("Summary").unwrap();
    // row 0 left blank; header on row 1
    ws.write_string(1, 0, "Indicator").unwrap();
    ws.write_string(1, 1, "Total").unwrap();
    ws.write_string(1, 2, "Unit").unwrap();
    ws.write_string(1, 3, "Category").unwrap();

    ws.write_string(2, 0, "Meals Served").unwrap();
    ws.write_number(2, 1, 5000).unwrap();
    ws.write_string(2, 2, "people").unwrap();
    ws.write_string(2, 3, "output").unwrap();

    ws.write_string(3, 0, "Grant Funding").unwrap();
    ws.write_number(3, 1, 12500.5).unwrap();
    ws.write_string(3, 2, "$").unwrap();
    ws.write_string(3, 3, "outcome").unwrap();

    ws.write_string(4, 0, "Volunteers").unwrap();
    ws.write_string(4, 1, "lots").unwrap();

    let raw = wb.add_worksheet();
    raw.set_name("Raw").unwrap();
    raw.write_string(0, 0, "label").unwrap();
    raw.write_string(0, 1, "value").unwrap();
    raw.write_string(1, 0, "Trees Planted").unwrap();
    raw.write_number(1, 1, 340).unwrap();

    wb.save(path).unwrap();
}

fn options(sheet: SheetSelection) -> ImportOptions {
    ImportOptions {
        config: ImportConfig {
            sheet,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn first_sheet_is_read_with_header_detection() {
    let path = tmp_file("first-sheet");
    write_metrics_xlsx(&path);

    let file = ImportFile::from_path(&path).unwrap();
    let report = import_file(file, options(SheetSelection::First))
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(report.kind, FileKind::Workbook);
    assert_eq!(report.encoding, None);
    assert_eq!(report.data.headers, vec!["Indicator", "Total", "Unit", "Category"]);
    assert_eq!(report.mapping.column_for(TargetField::Label), Some(0));
    assert_eq!(report.mapping.column_for(TargetField::Value), Some(1));

    assert_eq!(report.data.total_rows, 3);
    assert_eq!(report.data.valid_rows, 2);
    assert_eq!(report.records[0].value, 5000.0);
    assert_eq!(report.records[0].unit, Unit::People);
    assert_eq!(report.records[1].value, 12500.5);
    assert_eq!(report.records[1].unit, Unit::Currency);
    assert_eq!(report.records[1].metric_type, MetricType::Outcome);

    let invalid = report.data.rows.iter().find(|r| !r.is_valid).unwrap();
    assert_eq!(invalid.label, "Volunteers");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn named_sheet_is_selected() {
    let path = tmp_file("named-sheet");
    write_metrics_xlsx(&path);

    let file = ImportFile::from_path(&path).unwrap();
    let report = import_file(file, options(SheetSelection::Named("Raw".to_string())))
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].label, "Trees Planted");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn unknown_sheet_lists_available_sheets() {
    let path = tmp_file("missing-sheet");
    write_metrics_xlsx(&path);

    let file = ImportFile::from_path(&path).unwrap();
    let err = import_file(file, options(SheetSelection::Named("Q4".to_string()))).unwrap_err();
    match err {
        ImportError::SheetNotFound { name, available } => {
            assert_eq!(name, "Q4");
            assert_eq!(available, vec!["Summary", "Raw"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn workbook_bytes_behave_like_the_file() {
    let path = tmp_file("bytes");
    write_metrics_xlsx(&path);

    let from_path = import_file(ImportFile::from_path(&path).unwrap(), ImportOptions::default())
        .unwrap()
        .into_report()
        .unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    let from_bytes = import_file(ImportFile::from_bytes(name, bytes), ImportOptions::default())
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(from_path, from_bytes);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn renamed_workbook_imports_with_a_warning() {
    let path = tmp_file("renamed");
    write_metrics_xlsx(&path);
    let bytes = std::fs::read(&path).unwrap();

    let report = import_file(ImportFile::from_bytes("metrics.xls", bytes), ImportOptions::default())
        .unwrap()
        .into_report()
        .unwrap();
    assert_eq!(report.kind, FileKind::Workbook);
    assert!(!report.records.is_empty());
    let renamed = report
        .data
        .errors
        .iter()
        .find(|issue| issue.message.contains("'.xls' file contains"))
        .expect("mismatch warning");
    assert_eq!(renamed.row, 1);
    assert_eq!(renamed.severity, IssueSeverity::Warning);

    let _ = std::fs::remove_file(&path);
}
