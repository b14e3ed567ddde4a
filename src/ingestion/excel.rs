#![cfg(feature = "excel")]

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};

use crate::config::SheetSelection;
use crate::error::{ImportError, ImportResult};
use crate::types::{format_number, CellValue, RawTable};

use super::{trim_trailing_blank_headers, ParseObserver, ParseProgress, REPORT_EVERY_ROWS};

/// Parse a workbook container (`.xlsx`, `.xls`, `.ods`) held in memory.
///
/// Behavior:
/// - Picks the sheet named by `sheet`, or the first sheet in workbook order
/// - Treats the first non-empty row as the header row
/// - Reads remaining rows into the same cell model as delimited text
///
/// Returns `Ok(None)` if `observer` asked to stop.
pub fn parse_workbook_bytes(
    bytes: Vec<u8>,
    sheet: &SheetSelection,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = select_range(&mut workbook, sheet)?;
    Ok(table_from_range(&range, observer))
}

/// Parse a workbook file from disk.
pub fn parse_workbook_path(
    path: impl AsRef<Path>,
    sheet: &SheetSelection,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = select_range(&mut workbook, sheet)?;
    Ok(table_from_range(&range, observer))
}

fn select_range<RS, W>(workbook: &mut W, sheet: &SheetSelection) -> ImportResult<Range<Data>>
where
    RS: std::io::Read + std::io::Seek,
    W: Reader<RS, Error = calamine::Error>,
{
    let names: Vec<String> = workbook.sheet_names().to_vec();
    let name = match sheet {
        SheetSelection::First => names.first().cloned().ok_or(ImportError::NoHeaders)?,
        SheetSelection::Named(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted.as_str())
            .cloned()
            .ok_or_else(|| ImportError::SheetNotFound {
                name: wanted.clone(),
                available: names.clone(),
            })?,
    };
    Ok(workbook.worksheet_range(&name)?)
}

fn table_from_range(range: &Range<Data>, observer: &mut dyn ParseObserver) -> Option<RawTable> {
    let mut rows_iter = range.rows().skip_while(|row| row.iter().all(is_blank));

    let Some(header_row) = rows_iter.next() else {
        return Some(RawTable::default());
    };
    let mut headers: Vec<String> = header_row.iter().map(cell_to_header_string).collect();
    trim_trailing_blank_headers(&mut headers);
    let width = headers.len();

    let body: Vec<&[Data]> = rows_iter.collect();
    let total = body.len().max(1) as f64;
    let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(body.len());

    for (idx0, row) in body.iter().enumerate() {
        let cells: Vec<CellValue> = (0..width)
            .map(|i| row.get(i).map(convert_cell).unwrap_or(CellValue::Empty))
            .collect();
        if cells.iter().any(|c| !c.is_empty()) {
            rows.push(cells);
        }

        if (idx0 + 1) % REPORT_EVERY_ROWS == 0 {
            if observer.should_stop() {
                return None;
            }
            observer.on_rows(ParseProgress {
                rows_read: rows.len(),
                total_rows: Some(body.len()),
                fraction: (idx0 + 1) as f64 / total,
            });
        }
    }

    if observer.should_stop() {
        return None;
    }
    observer.on_rows(ParseProgress {
        rows_read: rows.len(),
        total_rows: Some(rows.len()),
        fraction: 1.0,
    });

    Some(RawTable::new(headers, rows))
}

fn is_blank(c: &Data) -> bool {
    match c {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(f) => f.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => "".to_string(),
    }
}

fn convert_cell(c: &Data) -> CellValue {
    match c {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from_text(s),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from_text(s),
        // Booleans, serial dates and error cells are kept as text; numeric validation rejects them.
        _ => CellValue::Text(c.to_string()),
    }
}
