//! Unified table reading.
//!
//! [`read_table`] turns an [`ImportFile`] into a [`RawTable`] once its kind and encoding are
//! known:
//!
//! - Delimited text below [`ImportConfig::streaming_threshold`] is decoded as one buffer.
//! - Larger delimited text is decoded chunk by chunk and fed straight to the CSV reader.
//! - Workbook containers are always read whole (the container format needs random access).

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ImportConfig;
use crate::constants::STREAM_READ_CHUNK;
use crate::detection::{decode_with, normalize_line_endings, remove_bom, DecodingReader, FileKind, TextEncoding};
use crate::error::ImportResult;
use crate::types::RawTable;

use super::csv::{parse_csv_stream, parse_csv_text};
use super::ParseObserver;

/// Where the bytes of an [`ImportFile`] live.
#[derive(Clone)]
pub enum FileSource {
    /// Bytes already in memory (e.g. an upload body).
    Bytes(Vec<u8>),
    /// A file on disk, read lazily.
    Path(PathBuf),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            FileSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

/// A user-supplied file: name, size and contents.
///
/// The file is moved into the import job, so a background worker owns its own copy of the
/// bytes.
#[derive(Debug, Clone)]
pub struct ImportFile {
    name: String,
    declared_mime: Option<String>,
    size: u64,
    source: FileSource,
}

impl ImportFile {
    /// Wrap in-memory bytes under the given file name.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime: None,
            size: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    /// Reference a file on disk. Its size is taken from metadata; contents are read later.
    pub fn from_path(path: impl AsRef<Path>) -> ImportResult<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            declared_mime: None,
            size,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Attach the MIME type claimed by the uploader (informational only).
    pub fn with_declared_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_mime(&self) -> Option<&str> {
        self.declared_mime.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read at most `n` leading bytes.
    pub fn read_prefix(&self, n: usize) -> ImportResult<Vec<u8>> {
        match &self.source {
            FileSource::Bytes(b) => Ok(b[..b.len().min(n)].to_vec()),
            FileSource::Path(p) => {
                let mut out = Vec::with_capacity(n);
                File::open(p)?.take(n as u64).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Consume the file and return all of its bytes.
    pub fn into_bytes(self) -> ImportResult<Vec<u8>> {
        match self.source {
            FileSource::Bytes(b) => Ok(b),
            FileSource::Path(p) => Ok(std::fs::read(p)?),
        }
    }

    /// Consume the file and return a sequential reader over its bytes.
    pub fn into_reader(self) -> ImportResult<Box<dyn Read + Send>> {
        match self.source {
            FileSource::Bytes(b) => Ok(Box::new(Cursor::new(b))),
            FileSource::Path(p) => Ok(Box::new(BufReader::new(File::open(p)?))),
        }
    }
}

/// Read `file` into a [`RawTable`].
///
/// `encoding` is ignored for workbook containers. Returns `Ok(None)` if `observer` asked to
/// stop.
pub fn read_table(
    file: ImportFile,
    kind: FileKind,
    encoding: TextEncoding,
    config: &ImportConfig,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    let delimiter = config.delimiter.map(|d| d as u8);
    let streaming = file.size() >= config.streaming_threshold;

    match kind {
        FileKind::DelimitedText if streaming => {
            debug!(file = file.name(), size = file.size(), "streaming delimited text");
            let head = file.read_prefix(config.sniff_bytes)?;
            let sample = normalize_line_endings(remove_bom(&decode_with(&head, encoding)));
            let total = file.size();
            let reader = DecodingReader::new(file.into_reader()?, encoding, STREAM_READ_CHUNK);
            parse_csv_stream(reader, total, delimiter, &sample, observer)
        }
        FileKind::DelimitedText => {
            let bytes = file.into_bytes()?;
            let text = normalize_line_endings(remove_bom(&decode_with(&bytes, encoding)));
            drop(bytes);
            parse_csv_text(&text, delimiter, observer)
        }
        FileKind::Workbook => read_workbook(file, config, observer),
    }
}

fn read_workbook(
    file: ImportFile,
    config: &ImportConfig,
    observer: &mut dyn ParseObserver,
) -> ImportResult<Option<RawTable>> {
    // Avoid unused warnings when the feature is off.
    let _ = (&file, config, &observer);

    #[cfg(feature = "excel")]
    {
        let bytes = file.into_bytes()?;
        super::excel::parse_workbook_bytes(bytes, &config.sheet, observer)
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(crate::error::ImportError::Config {
            message: "workbook parsing not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::encode;
    use crate::error::ImportError;
    use crate::types::CellValue;

    #[test]
    fn whole_buffer_and_streaming_agree() {
        let text = "\u{FEFF}label;value\r\nCafé;1\r\nNiño;2\r\n";
        let bytes = encode(text, TextEncoding::Utf16Le);

        let whole = read_table(
            ImportFile::from_bytes("a.csv", bytes.clone()),
            FileKind::DelimitedText,
            TextEncoding::Utf16Le,
            &ImportConfig::default(),
            &mut (),
        )
        .unwrap()
        .unwrap();

        let streaming_cfg = ImportConfig {
            worker_threshold: 0,
            streaming_threshold: 0,
            ..Default::default()
        };
        let streamed = read_table(
            ImportFile::from_bytes("a.csv", bytes),
            FileKind::DelimitedText,
            TextEncoding::Utf16Le,
            &streaming_cfg,
            &mut (),
        )
        .unwrap()
        .unwrap();

        assert_eq!(whole, streamed);
        assert_eq!(whole.headers, vec!["label", "value"]);
        assert_eq!(whole.rows[0][0], CellValue::Text("Café".to_string()));
    }

    #[test]
    fn latin1_text_decodes() {
        let bytes = b"label,value\nNi\xF1os,3\n".to_vec();
        let t = read_table(
            ImportFile::from_bytes("a.csv", bytes),
            FileKind::DelimitedText,
            TextEncoding::Iso8859_1,
            &ImportConfig::default(),
            &mut (),
        )
        .unwrap()
        .unwrap();
        assert_eq!(t.rows[0][0], CellValue::Text("Niños".to_string()));
    }

    #[test]
    fn prefix_is_bounded() {
        let f = ImportFile::from_bytes("a.csv", b"0123456789".to_vec()).with_declared_mime("text/csv");
        assert_eq!(f.read_prefix(4).unwrap(), b"0123");
        assert_eq!(f.read_prefix(100).unwrap().len(), 10);
        assert_eq!(f.size(), 10);
        assert_eq!(f.declared_mime(), Some("text/csv"));
    }

    #[test]
    fn missing_path_is_io_error() {
        let err = ImportFile::from_path("tests/fixtures/does_not_exist.csv").unwrap_err();
        assert!(matches!(err, ImportError::Io(_)));
    }
}
