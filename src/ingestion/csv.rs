//! Delimited-text parsing.

use std::io::Read;

use crate::detection::DecodingReader;
use crate::error::ImportResult;
use crate::types::{CellValue, RawTable};

use super::{trim_trailing_blank_headers, ParseObserver, ParseProgress, REPORT_EVERY_ROWS};

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const DELIMITER_SAMPLE_LINES: usize = 10;

/// Parse already-decoded, line-normalized text into a [`RawTable`].
///
/// Rules:
///
/// - The first record is the header row; an empty input yields an empty table.
/// - Quoted fields may contain delimiters and newlines.
/// - Short rows are padded with empty cells; extra trailing cells are dropped.
/// - Rows whose cells are all blank are skipped.
///
/// Returns `Ok(None)` if `observer` asked to stop.
pub fn parse_csv_text(
    text: &str,
    delimiter: Option<u8>,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(text));
    let mut rdr = reader_builder(delimiter).from_reader(text.as_bytes());
    let total = text.len().max(1) as f64;
    read_table(&mut rdr, |r| r.position().byte() as f64 / total, observer)
}

/// Parse a chunked, decoding stream into a [`RawTable`].
///
/// `total_bytes` is the raw file size, used to report progress as a fraction of input consumed.
/// When `delimiter` is `None` it is detected from `sample`, the decoded head of the file.
pub fn parse_csv_stream<R: Read>(
    reader: DecodingReader<R>,
    total_bytes: u64,
    delimiter: Option<u8>,
    sample: &str,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(sample));
    let mut rdr = reader_builder(delimiter).from_reader(reader);
    let total = total_bytes.max(1) as f64;
    read_table(
        &mut rdr,
        |r| r.get_ref().bytes_consumed() as f64 / total,
        observer,
    )
}

fn reader_builder(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(delimiter)
        .has_headers(true)
        // Exports routinely truncate trailing empty cells.
        .flexible(true)
        .trim(csv::Trim::None);
    builder
}

fn read_table<R: Read>(
    rdr: &mut csv::Reader<R>,
    fraction: impl Fn(&csv::Reader<R>) -> f64,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let mut headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    trim_trailing_blank_headers(&mut headers);
    let width = headers.len();

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut record = csv::StringRecord::new();
    let mut seen = 0usize;

    while rdr.read_record(&mut record)? {
        seen += 1;
        let row: Vec<CellValue> = (0..width)
            .map(|i| record.get(i).map(CellValue::from_text).unwrap_or(CellValue::Empty))
            .collect();
        if row.iter().any(|c| !c.is_empty()) {
            rows.push(row);
        }

        if seen % REPORT_EVERY_ROWS == 0 {
            if observer.should_stop() {
                return Ok(None);
            }
            observer.on_rows(ParseProgress {
                rows_read: rows.len(),
                total_rows: None,
                fraction: fraction(&*rdr).min(1.0),
            });
        }
    }

    if observer.should_stop() {
        return Ok(None);
    }
    observer.on_rows(ParseProgress {
        rows_read: rows.len(),
        total_rows: Some(rows.len()),
        fraction: 1.0,
    });

    Ok(Some(RawTable::new(headers, rows)))
}

/// Guess the field delimiter from the first lines of `sample`.
///
/// Each candidate is scored by how often it appears per line and how consistent that count is;
/// comma wins ties and is the fallback when no candidate appears at all.
pub fn detect_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0.0f64;
    for &candidate in &DELIMITER_CANDIDATES {
        let counts: Vec<f64> = lines
            .iter()
            .map(|l| count_unquoted(l, candidate) as f64)
            .collect();
        let avg = counts.iter().sum::<f64>() / counts.len() as f64;
        if avg == 0.0 {
            continue;
        }
        let variance = counts.iter().map(|c| (c - avg).powi(2)).sum::<f64>() / counts.len() as f64;
        let score = avg / (1.0 + variance.sqrt());
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}
